use serde::{Deserialize, Serialize};

use crate::node::NodeDescriptor;
use crate::position::Position;
use crate::registry::{PolicyId, TaskId};
use crate::state::DebugState;
use crate::variables::DebugVariable;

/// Point-in-time view of a debug session, delivered to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResult {
    pub task_id: TaskId,
    pub policy_id: PolicyId,
    /// Update version this snapshot was taken at.
    pub version: u64,
    pub state: DebugState,
    pub current_position: Option<Position>,
    pub current_node: Option<NodeDescriptor>,
    /// Breakpoints in document order.
    pub breakpoints: Vec<Position>,
    pub variables: Vec<DebugVariable>,
    pub outcome_message: Option<String>,
    pub terminated: bool,
}

impl SessionResult {
    pub fn is_paused(&self) -> bool {
        self.state == DebugState::AtBreakpoint
    }

    /// Finds a variable by its dotted name, including children of structured variables.
    pub fn variable(&self, name: &str) -> Option<&DebugVariable> {
        self.variables
            .iter()
            .find(|var| var.name == name)
            .or_else(|| self.variables.iter().find_map(|var| var.find(name)))
    }
}

/// One row of the session listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub task_id: TaskId,
    pub policy_id: PolicyId,
    pub state: DebugState,
    pub breakpoint_count: usize,
}
