//! Core protocol types shared across all vidbot crates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed interval `[i1, i2]` of monotone logical frame indices.
///
/// Identifies which decoded frames an emitted message applies to. A single
/// decoded frame has `i1 == i2`. The `{0,0}` sentinel means "use the frame
/// currently being processed" when a bot passes it to `emit`, and
/// "not frame-bound" once a message is on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameId {
    pub i1: u64,
    pub i2: u64,
}

impl FrameId {
    /// The `{0,0}` sentinel.
    pub const UNBOUND: FrameId = FrameId { i1: 0, i2: 0 };

    /// Interval covering exactly one decoded frame.
    pub fn single(index: u64) -> Self {
        FrameId {
            i1: index,
            i2: index,
        }
    }

    /// Interval covering frames `i1` through `i2` inclusive. `i2` must not
    /// precede `i1`.
    pub fn span(i1: u64, i2: u64) -> Self {
        debug_assert!(i2 >= i1, "frame interval end precedes start");
        FrameId { i1, i2 }
    }

    /// Whether this is the `{0,0}` sentinel.
    pub fn is_unbound(&self) -> bool {
        *self == FrameId::UNBOUND
    }
}

impl Default for FrameId {
    fn default() -> Self {
        FrameId::UNBOUND
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.i1, self.i2)
    }
}
