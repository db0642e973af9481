//! 128-bit ring position.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::token::traits::{Token, TokenError};

/// A position in the circular 128-bit hash space.
///
/// Positions are totally ordered; the space wraps past `u128::MAX` back to
/// zero. On the wire a position is its 32-digit lowercase hex form, which
/// keeps metadata tables readable and sidesteps JSON number precision.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct RingPosition(pub u128);

impl Token for RingPosition {
    fn zero() -> Self {
        RingPosition(0)
    }

    fn max() -> Self {
        RingPosition(u128::MAX)
    }

    fn distance_to(&self, other: &Self) -> Self {
        RingPosition(other.0.wrapping_sub(self.0))
    }

    fn advance(&self, by: &Self) -> Self {
        RingPosition(self.0.wrapping_add(by.0))
    }
}

impl fmt::Display for RingPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl FromStr for RingPosition {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.len() > 32 {
            return Err(TokenError::InvalidText(s.to_string()));
        }
        u128::from_str_radix(s, 16)
            .map(RingPosition)
            .map_err(|_| TokenError::InvalidText(s.to_string()))
    }
}

impl From<u128> for RingPosition {
    fn from(value: u128) -> Self {
        RingPosition(value)
    }
}

impl Serialize for RingPosition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RingPosition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
