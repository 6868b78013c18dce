//! Byte-precise memory SSA and reaching definitions over read-write
//! graphs, the data-dependence core of a program slicer.
//!
//! A frontend lowers each procedure into an [`RWGraph`][`graph::RWGraph`]:
//! basic blocks of nodes that overwrite (strong update), define (weak
//! update) or use memory at byte granularity. [`MemorySsa`] assigns every
//! use the set of writes that may reach it, inserting PHI nodes at
//! control-flow joins where several definitions meet.

pub use analysis::{
    MemorySsa,
    PhiId,
};
pub use definitions::{
    DefinitionsMap,
    IntervalEntry,
};
pub use interval::Interval;
pub use offset::Offset;
pub use verifier::{
    Verifier,
    VerifyError,
};

pub mod analysis;
mod definitions;
pub mod graph;
mod interval;
mod offset;
#[cfg(test)]
pub mod test;
mod verifier;

/// A hash set that iterates in insertion order.
pub type FxIndexSet<T> = indexmap::IndexSet<T, fxhash::FxBuildHasher>;
