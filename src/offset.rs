use std::{
    fmt::{
        Debug,
        Display,
        Formatter,
    },
    ops::{
        Add,
        Sub,
    },
};

/// A byte offset into a memory object.
///
/// The maximum raw value is reserved as the [`UNKNOWN`][`Offset::UNKNOWN`]
/// sentinel. Arithmetic propagates the sentinel: any operation with an
/// unknown operand (or an overflowing result) yields `UNKNOWN`.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Offset(pub u64);

impl Offset {
    pub const UNKNOWN: Self = Self(u64::MAX);
    pub const ZERO: Self = Self(0);

    pub fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }
}

impl From<u64> for Offset {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl Add for Offset {
    type Output = Offset;

    fn add(self, rhs: Self) -> Self::Output {
        if self.is_unknown() || rhs.is_unknown() {
            return Self::UNKNOWN;
        }
        self.0.checked_add(rhs.0).map(Self).unwrap_or(Self::UNKNOWN)
    }
}

impl Sub for Offset {
    type Output = Offset;

    fn sub(self, rhs: Self) -> Self::Output {
        if self.is_unknown() || rhs.is_unknown() {
            return Self::UNKNOWN;
        }
        debug_assert!(rhs.0 <= self.0, "offset underflow: {self} - {rhs}");
        Self(self.0 - rhs.0)
    }
}

impl Display for Offset {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_unknown() {
            write!(f, "?")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl Debug for Offset {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Offset({self})")
    }
}
