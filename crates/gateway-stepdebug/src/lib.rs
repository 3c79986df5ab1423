//! Interactive step debugger for gateway policy execution.
//!
//! This crate provides:
//! - [`DebugSession`]: the per-task state machine that parks a worker thread on a paused
//!   assertion and lets a controller inspect variables and step through the policy tree.
//! - [`SessionRegistry`]: the process-wide table of sessions, enforcing one armed session
//!   per policy.
//! - [`DebugAdmin`]: the controller-facing API and its JSON command envelope.
//!
//! The interpreter integrates through [`SessionRegistry::attach`], the [`MessageDebugger`]
//! guard it returns, a [`NodeDescriptor`] per visited node and a [`VariableResolver`].

pub mod admin;
pub mod config;
pub mod error;
pub mod logging;
pub mod node;
pub mod position;
pub mod registry;
pub mod result;
pub mod session;
pub mod state;
pub mod variables;

pub use crate::admin::{AdminRequest, AdminResponse, DebugAdmin};
pub use crate::config::{ConfigError, DebuggerConfig, LoggingConfig, VariablesConfig};
pub use crate::error::{DebugResult, SessionError};
pub use crate::node::{NodeDescriptor, NodeKind};
pub use crate::position::{Position, PositionError};
pub use crate::registry::{PolicyId, SessionRegistry, TaskId};
pub use crate::result::{SessionResult, SessionSummary};
pub use crate::session::{
    DebugSession, MessageDebugger, MessageTicket, PolicyOutcome, SUCCESS_MESSAGE,
};
pub use crate::state::{CommandStatus, DebugState};
pub use crate::variables::{
    DebugVariable, ResolvedVariable, VariableResolver, VariableSnapshot, VariableValue,
};
