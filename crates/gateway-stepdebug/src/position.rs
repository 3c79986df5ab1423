use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PositionError {
    #[error("position must contain at least one ordinal")]
    Empty,
    #[error("position ordinals are 1-based; got 0 at index {0}")]
    ZeroOrdinal(usize),
    #[error("invalid position ordinal {0:?}")]
    InvalidOrdinal(String),
}

/// Path from the policy root to an assertion node.
///
/// Each entry is the 1-based ordinal of a node within its parent composite. Positions are
/// ordered lexicographically, which matches pre-order (document) order of the policy tree:
/// a node sorts after all of its ancestors and before the siblings that follow it.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Vec<u32>", into = "Vec<u32>")]
pub struct Position(Arc<[u32]>);

impl Position {
    pub fn new(ordinals: impl Into<Vec<u32>>) -> Result<Self, PositionError> {
        let ordinals = ordinals.into();
        if ordinals.is_empty() {
            return Err(PositionError::Empty);
        }
        if let Some(idx) = ordinals.iter().position(|&ordinal| ordinal == 0) {
            return Err(PositionError::ZeroOrdinal(idx));
        }
        Ok(Self(ordinals.into()))
    }

    /// Single-level position, the common case for flat-numbered policies.
    pub fn line(ordinal: u32) -> Result<Self, PositionError> {
        Self::new(vec![ordinal])
    }

    pub fn ordinals(&self) -> &[u32] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Position of the enclosing composite, or `None` for a top-level node.
    pub fn parent(&self) -> Option<Position> {
        if self.0.len() <= 1 {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].into()))
    }

    /// Non-strict prefix test: `self` equals `other` or is one of its ancestors.
    pub fn is_prefix_of(&self, other: &Position) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }

    /// Strict ancestor test.
    pub fn is_ancestor_of(&self, other: &Position) -> bool {
        other.0.len() > self.0.len() && self.is_prefix_of(other)
    }
}

impl TryFrom<Vec<u32>> for Position {
    type Error = PositionError;

    fn try_from(value: Vec<u32>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Position> for Vec<u32> {
    fn from(value: Position) -> Self {
        value.0.to_vec()
    }
}

impl FromStr for Position {
    type Err = PositionError;

    /// Parses the dotted form produced by `Display` (`"5"`, `"2.1"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(PositionError::Empty);
        }
        let ordinals = trimmed
            .split('.')
            .map(|part| {
                part.trim()
                    .parse::<u32>()
                    .map_err(|_| PositionError::InvalidOrdinal(part.to_owned()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(ordinals)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, ordinal) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(".")?;
            }
            write!(f, "{ordinal}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Position({self})")
    }
}
