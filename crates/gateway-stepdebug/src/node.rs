use std::fmt;

use serde::{Deserialize, Serialize};

use crate::position::Position;

/// Kind of assertion node, as far as the debugger cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    /// Sequential composite: children run in order until one fails.
    All,
    /// Branching composite: children run in order until one succeeds.
    OneOrMore,
    Leaf,
}

impl NodeKind {
    pub fn is_composite(self) -> bool {
        !matches!(self, NodeKind::Leaf)
    }
}

/// Minimal description of the node the interpreter is about to evaluate.
///
/// This is the only interpreter type the debugger sees; it never inspects the concrete
/// assertion implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDescriptor {
    pub position: Position,
    pub kind: NodeKind,
    pub display_name: String,
}

impl NodeDescriptor {
    pub fn new(position: Position, kind: NodeKind, display_name: impl Into<String>) -> Self {
        Self {
            position,
            kind,
            display_name: display_name.into(),
        }
    }

    pub fn leaf(position: Position, display_name: impl Into<String>) -> Self {
        Self::new(position, NodeKind::Leaf, display_name)
    }
}

impl fmt::Display for NodeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.position, self.display_name)
    }
}
