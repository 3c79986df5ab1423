use thiserror::Error;

use crate::position::PositionError;
use crate::registry::{PolicyId, TaskId};

pub type DebugResult<T> = Result<T, SessionError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("policy {policy_id} is already being debugged by task {active_task_id}")]
    SessionConflict {
        policy_id: PolicyId,
        active_task_id: TaskId,
    },
    #[error("unknown debug task {0}")]
    UnknownTask(TaskId),
    #[error("invalid context variable name {0:?}")]
    InvalidVariableName(String),
    #[error("invalid position: {0}")]
    InvalidPosition(#[from] PositionError),
}
