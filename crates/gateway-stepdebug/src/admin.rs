//! Controller-facing API.
//!
//! [`DebugAdmin`] addresses sessions by task id and is what an RPC layer wraps. The
//! [`AdminRequest`]/[`AdminResponse`] envelope lets such a layer dispatch JSON commands
//! without depending on the session types.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{DebugResult, SessionError};
use crate::position::Position;
use crate::registry::{PolicyId, SessionRegistry, TaskId};
use crate::result::{SessionResult, SessionSummary};
use crate::session::DebugSession;
use crate::state::CommandStatus;

#[derive(Debug, Clone, Default)]
pub struct DebugAdmin {
    registry: SessionRegistry,
}

impl DebugAdmin {
    pub fn new(registry: SessionRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    fn session(&self, task_id: TaskId) -> DebugResult<Arc<DebugSession>> {
        self.registry
            .get(task_id)
            .ok_or(SessionError::UnknownTask(task_id))
    }

    pub fn create_session(&self, policy_id: impl Into<PolicyId>) -> TaskId {
        self.registry.create(policy_id).task_id()
    }

    pub fn start(&self, task_id: TaskId) -> DebugResult<()> {
        self.registry.start(task_id)
    }

    pub fn stop(&self, task_id: TaskId) -> DebugResult<()> {
        self.session(task_id)?.stop();
        Ok(())
    }

    /// Unknown task ids are accepted, so a retried terminate succeeds.
    pub fn terminate(&self, task_id: TaskId) {
        self.registry.terminate(task_id);
    }

    pub fn resume(&self, task_id: TaskId) -> CommandStatus {
        self.command(task_id, |session| session.resume())
    }

    pub fn step_into(&self, task_id: TaskId) -> CommandStatus {
        self.command(task_id, |session| session.step_into())
    }

    pub fn step_over(&self, task_id: TaskId, target: Position) -> CommandStatus {
        self.command(task_id, |session| session.step_over(target))
    }

    pub fn step_out(&self, task_id: TaskId, target: Position) -> CommandStatus {
        self.command(task_id, |session| session.step_out(target))
    }

    /// Step commands for a session that is gone are ignored like any other stale command.
    fn command(
        &self,
        task_id: TaskId,
        apply: impl FnOnce(&DebugSession) -> CommandStatus,
    ) -> CommandStatus {
        match self.registry.get(task_id) {
            Some(session) => apply(&session),
            None => CommandStatus::Ignored,
        }
    }

    pub fn toggle_breakpoint(&self, task_id: TaskId, position: Position) -> DebugResult<bool> {
        Ok(self.session(task_id)?.toggle_breakpoint(position))
    }

    pub fn remove_all_breakpoints(&self, task_id: TaskId) -> DebugResult<()> {
        self.session(task_id)?.remove_all_breakpoints();
        Ok(())
    }

    pub fn add_user_context_variable(&self, task_id: TaskId, name: &str) -> DebugResult<()> {
        self.session(task_id)?.add_user_context_variable(name)
    }

    pub fn remove_user_context_variable(&self, task_id: TaskId, name: &str) -> DebugResult<()> {
        self.session(task_id)?.remove_user_context_variable(name)
    }

    /// Long-polls the session. `None` on timeout, and also when the task is unknown.
    ///
    /// Uses the session's shared delivery cursor, so with several controllers each version
    /// reaches only one of them. Controllers that poll independently pass the last version
    /// they saw to [`DebugAdmin::wait_for_updates_since`] instead.
    pub fn wait_for_updates(&self, task_id: TaskId, timeout_millis: u64) -> Option<SessionResult> {
        self.registry
            .get(task_id)?
            .wait_for_updates(Duration::from_millis(timeout_millis))
    }

    /// Long-polls for a version newer than `since_version`, without touching the shared
    /// cursor.
    pub fn wait_for_updates_since(
        &self,
        task_id: TaskId,
        since_version: u64,
        timeout_millis: u64,
    ) -> Option<SessionResult> {
        self.registry
            .get(task_id)?
            .wait_for_updates_since(since_version, Duration::from_millis(timeout_millis))
    }

    /// Current snapshot without waiting.
    pub fn session_result(&self, task_id: TaskId) -> DebugResult<SessionResult> {
        Ok(self.session(task_id)?.result())
    }

    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        self.registry
            .sessions()
            .iter()
            .map(|session| session.summary())
            .collect()
    }

    /// Dispatches one enveloped command.
    pub fn handle(&self, request: AdminRequest) -> AdminResponse {
        tracing::debug!(
            target: "stepdebug.admin",
            command = request.name(),
            "handling admin request"
        );

        let response = match request {
            AdminRequest::CreateSession { policy_id } => {
                let task_id = self.create_session(policy_id);
                AdminResponse::body(&json!({ "taskId": task_id }))
            }
            AdminRequest::Start { task_id } => self.start(task_id).into(),
            AdminRequest::Stop { task_id } => self.stop(task_id).into(),
            AdminRequest::Terminate { task_id } => {
                self.terminate(task_id);
                AdminResponse::ok()
            }
            AdminRequest::Resume { task_id } => status_response(self.resume(task_id)),
            AdminRequest::StepInto { task_id } => status_response(self.step_into(task_id)),
            AdminRequest::StepOver { task_id, target } => {
                status_response(self.step_over(task_id, target))
            }
            AdminRequest::StepOut { task_id, target } => {
                status_response(self.step_out(task_id, target))
            }
            AdminRequest::ToggleBreakpoint { task_id, position } => {
                match self.toggle_breakpoint(task_id, position) {
                    Ok(enabled) => AdminResponse::body(&json!({ "enabled": enabled })),
                    Err(err) => AdminResponse::error(err.to_string()),
                }
            }
            AdminRequest::RemoveAllBreakpoints { task_id } => {
                self.remove_all_breakpoints(task_id).into()
            }
            AdminRequest::AddUserContextVariable { task_id, name } => {
                self.add_user_context_variable(task_id, &name).into()
            }
            AdminRequest::RemoveUserContextVariable { task_id, name } => {
                self.remove_user_context_variable(task_id, &name).into()
            }
            AdminRequest::WaitForUpdates {
                task_id,
                timeout_millis,
                since_version,
            } => {
                let update = match since_version {
                    Some(version) => self.wait_for_updates_since(task_id, version, timeout_millis),
                    None => self.wait_for_updates(task_id, timeout_millis),
                };
                match update {
                    Some(result) => AdminResponse::body(&result),
                    None => AdminResponse::ok(),
                }
            }
            AdminRequest::GetResult { task_id } => match self.session_result(task_id) {
                Ok(result) => AdminResponse::body(&result),
                Err(err) => AdminResponse::error(err.to_string()),
            },
            AdminRequest::ListSessions => {
                AdminResponse::body(&json!({ "sessions": self.list_sessions() }))
            }
        };

        if let Some(message) = response.message.as_deref().filter(|_| !response.success) {
            tracing::debug!(
                target: "stepdebug.admin",
                error = message,
                "admin request failed"
            );
        }
        response
    }

    /// Parses, dispatches and serializes one JSON command. Malformed input yields an error
    /// response; values from the input are not echoed back.
    pub fn handle_json(&self, request: &str) -> String {
        let response = match serde_json::from_str::<AdminRequest>(request) {
            Ok(request) => self.handle(request),
            Err(err) => {
                let message = sanitize_json_error_message(&err.to_string());
                tracing::warn!(
                    target: "stepdebug.admin",
                    error = %message,
                    "rejecting malformed admin request"
                );
                AdminResponse::error(format!("invalid request: {message}"))
            }
        };
        serde_json::to_string(&response).unwrap_or_else(|_| {
            r#"{"success":false,"message":"failed to serialize response"}"#.to_owned()
        })
    }
}

/// A controller command in wire form, tagged by `command`.
///
/// ```json
/// {"command": "stepOver", "taskId": "…", "target": [9]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum AdminRequest {
    CreateSession {
        policy_id: PolicyId,
    },
    Start {
        task_id: TaskId,
    },
    Stop {
        task_id: TaskId,
    },
    Terminate {
        task_id: TaskId,
    },
    Resume {
        task_id: TaskId,
    },
    StepInto {
        task_id: TaskId,
    },
    StepOver {
        task_id: TaskId,
        target: Position,
    },
    StepOut {
        task_id: TaskId,
        target: Position,
    },
    ToggleBreakpoint {
        task_id: TaskId,
        position: Position,
    },
    RemoveAllBreakpoints {
        task_id: TaskId,
    },
    AddUserContextVariable {
        task_id: TaskId,
        name: String,
    },
    RemoveUserContextVariable {
        task_id: TaskId,
        name: String,
    },
    WaitForUpdates {
        task_id: TaskId,
        #[serde(default)]
        timeout_millis: u64,
        /// Last version this caller saw. Absent means the session's shared cursor.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        since_version: Option<u64>,
    },
    GetResult {
        task_id: TaskId,
    },
    ListSessions,
}

impl AdminRequest {
    pub fn name(&self) -> &'static str {
        match self {
            AdminRequest::CreateSession { .. } => "createSession",
            AdminRequest::Start { .. } => "start",
            AdminRequest::Stop { .. } => "stop",
            AdminRequest::Terminate { .. } => "terminate",
            AdminRequest::Resume { .. } => "resume",
            AdminRequest::StepInto { .. } => "stepInto",
            AdminRequest::StepOver { .. } => "stepOver",
            AdminRequest::StepOut { .. } => "stepOut",
            AdminRequest::ToggleBreakpoint { .. } => "toggleBreakpoint",
            AdminRequest::RemoveAllBreakpoints { .. } => "removeAllBreakpoints",
            AdminRequest::AddUserContextVariable { .. } => "addUserContextVariable",
            AdminRequest::RemoveUserContextVariable { .. } => "removeUserContextVariable",
            AdminRequest::WaitForUpdates { .. } => "waitForUpdates",
            AdminRequest::GetResult { .. } => "getResult",
            AdminRequest::ListSessions => "listSessions",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl AdminResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
            body: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            body: None,
        }
    }

    fn body<T: Serialize>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(body) => Self {
                success: true,
                message: None,
                body: Some(body),
            },
            Err(err) => Self::error(format!("failed to serialize response body: {err}")),
        }
    }
}

impl From<DebugResult<()>> for AdminResponse {
    fn from(result: DebugResult<()>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(err) => Self::error(err.to_string()),
        }
    }
}

fn status_response(status: CommandStatus) -> AdminResponse {
    AdminResponse::body(&json!({ "status": status }))
}

/// Parse errors for [`AdminRequest`] quote string input (`invalid type: string "..."`) and
/// echo unknown command names and bad task-id characters in backticks. Those values may be
/// secrets, so they are replaced. Field names and lists of expected commands are kept.
fn sanitize_json_error_message(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    let mut rest = message;
    while let Some(start) = rest.find('"') {
        out.push_str(&rest[..start + 1]);
        rest = &rest[start + 1..];
        let Some(end) = rest.find('"') else {
            break;
        };
        out.push_str("<redacted>\"");
        rest = &rest[end + 1..];
    }
    out.push_str(rest);

    for marker in ["unknown variant `", "found `"] {
        redact_backticked_after(&mut out, marker);
    }
    out
}

fn redact_backticked_after(message: &mut String, marker: &str) {
    let mut from = 0;
    while let Some(found) = message[from..].find(marker) {
        let start = from + found + marker.len();
        let Some(len) = message[start..].find('`') else {
            return;
        };
        message.replace_range(start..start + len, "<redacted>");
        from = start + "<redacted>".len() + 1;
    }
}
