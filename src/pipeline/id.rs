//! Identity types for the simulation.
//!
//! All IDs are newtypes over `u32` that serve as direct array indices
//! into their respective storage vectors, providing O(1) lookup.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Index into `Pipeline::stages`. Stage 0 is the innermost producer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(pub u32);

impl StageId {
    pub const INVALID: StageId = StageId(u32::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// The neighbouring stage one step closer to stage 0, if any.
    #[inline]
    pub fn downstream(self) -> Option<StageId> {
        self.0.checked_sub(1).map(StageId)
    }

    /// The neighbouring stage one step closer to the consumer.
    #[inline]
    pub fn upstream(self) -> StageId {
        StageId(self.0.saturating_add(1))
    }
}

impl fmt::Debug for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "StageId(INVALID)")
        } else {
            write!(f, "StageId({})", self.0)
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Index into `TokenArena::tokens`. Requests, futures and work items share
/// one id space so the keyframe stream can address any of them.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(pub u32);

impl TokenId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "el{}", self.0)
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_id() {
        let id = StageId(3);
        assert!(id.is_valid());
        assert_eq!(id.index(), 3);
        assert!(!StageId::INVALID.is_valid());
    }

    #[test]
    fn test_stage_neighbours() {
        assert_eq!(StageId(2).downstream(), Some(StageId(1)));
        assert_eq!(StageId(0).downstream(), None);
        assert_eq!(StageId(0).upstream(), StageId(1));
    }

    #[test]
    fn test_token_id_display() {
        assert_eq!(TokenId(7).to_string(), "el7");
        assert_eq!(TokenId(7).index(), 7);
    }
}
