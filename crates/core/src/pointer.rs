use std::fmt;

use serde::{Deserialize, Serialize};

/// Watermark position on a time axis, measured in ticks.
///
/// A node's effective pointer says how far its output has been computed;
/// its expected pointer says how far it should be computed given the
/// current state of its upstream nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pointer(pub i64);

impl Pointer {
    /// Nothing computed yet.
    pub const ZERO: Pointer = Pointer(0);
    /// Unbounded.
    pub const MAX: Pointer = Pointer(i64::MAX);

    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn value(self) -> i64 {
        self.0
    }
}

impl From<i64> for Pointer {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Pointer::MAX {
            write!(f, "MAX")
        } else {
            write!(f, "{}", self.0)
        }
    }
}
