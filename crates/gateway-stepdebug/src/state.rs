use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DebugState {
    /// Not debugging. Initial state and the resting state after a request completes.
    #[default]
    Stopped,
    /// Armed by the controller, waiting for the next request to arrive.
    Started,
    /// Pause at the very next node visited.
    BreakAtNextLine,
    /// Run until a breakpoint or the pending step target is reached.
    BreakAtNextBreakpoint,
    /// The bound request is parked on a node.
    AtBreakpoint,
}

impl DebugState {
    pub fn is_stopped(self) -> bool {
        matches!(self, DebugState::Stopped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DebugState::Stopped => "STOPPED",
            DebugState::Started => "STARTED",
            DebugState::BreakAtNextLine => "BREAK_AT_NEXT_LINE",
            DebugState::BreakAtNextBreakpoint => "BREAK_AT_NEXT_BREAKPOINT",
            DebugState::AtBreakpoint => "AT_BREAKPOINT",
        }
    }
}

impl fmt::Display for DebugState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a step/resume command.
///
/// Commands that only make sense while paused are ignored rather than rejected when the
/// session has moved on (for example because the request finished concurrently).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommandStatus {
    Applied,
    Ignored,
}

impl CommandStatus {
    pub fn is_applied(self) -> bool {
        matches!(self, CommandStatus::Applied)
    }
}
