//! Ownership ranges on the circular hash space.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::token::{RingPosition, Token};

/// A contiguous, possibly wrapping, interval of the ring.
///
/// `Span { start, end }` is the half-open interval `(start, end]`. It wraps
/// past the maximum position whenever `start >= end`; `start == end` is the
/// whole circle, which is what a sole ring member owns. The boundary value
/// belongs to the range that ends at it.
///
/// `Empty` owns nothing. A node that has been removed from the ring carries
/// it as the signal to hand off everything it stores.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyRange {
    Span {
        start: RingPosition,
        end: RingPosition,
    },
    #[default]
    Empty,
}

impl KeyRange {
    pub fn span(start: RingPosition, end: RingPosition) -> Self {
        KeyRange::Span { start, end }
    }

    /// The whole circle, anchored at `at`.
    pub fn full(at: RingPosition) -> Self {
        KeyRange::Span { start: at, end: at }
    }

    /// Whether `position` falls in `(start, end]`, honouring wraparound.
    pub fn contains(&self, position: RingPosition) -> bool {
        match *self {
            KeyRange::Empty => false,
            KeyRange::Span { start, end } if start < end => position > start && position <= end,
            KeyRange::Span { start, end } => position > start || position <= end,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, KeyRange::Empty)
    }

    pub fn is_full(&self) -> bool {
        matches!(self, KeyRange::Span { start, end } if start == end)
    }

    pub fn start(&self) -> Option<RingPosition> {
        match *self {
            KeyRange::Span { start, .. } => Some(start),
            KeyRange::Empty => None,
        }
    }

    pub fn end(&self) -> Option<RingPosition> {
        match *self {
            KeyRange::Span { end, .. } => Some(end),
            KeyRange::Empty => None,
        }
    }

    /// Number of positions covered. The full circle has 2^128 positions,
    /// which saturates to `u128::MAX`.
    pub fn width(&self) -> u128 {
        match *self {
            KeyRange::Empty => 0,
            KeyRange::Span { start, end } if start == end => u128::MAX,
            KeyRange::Span { start, end } => start.distance_to(&end).0,
        }
    }

    /// Position halfway through the range, used by even-split placement.
    pub fn midpoint(&self) -> Option<RingPosition> {
        match *self {
            KeyRange::Empty => None,
            KeyRange::Span { start, .. } => Some(start.advance(&RingPosition(self.width() / 2))),
        }
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyRange::Span { start, end } => write!(f, "({}, {}]", start, end),
            KeyRange::Empty => f.write_str("(empty)"),
        }
    }
}
