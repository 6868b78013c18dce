pub use memory_ssa::{
    MemorySsa,
    PhiId,
};

pub mod memory_ssa;
