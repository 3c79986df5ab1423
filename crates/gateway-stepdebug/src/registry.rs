use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::DebuggerConfig;
use crate::error::{DebugResult, SessionError};
use crate::session::{DebugSession, MessageDebugger};
use crate::state::DebugState;

/// Opaque identifier of a debug session, handed to the controller at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Identifier of the policy a session debugs. Compared verbatim.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyId(String);

impl PolicyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PolicyId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for PolicyId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    sessions: HashMap<TaskId, Arc<DebugSession>>,
    by_policy: HashMap<PolicyId, BTreeSet<TaskId>>,
}

impl RegistryState {
    /// The session for `policy_id` that is currently armed, if any.
    fn active_for_policy(&self, policy_id: &PolicyId) -> Option<&Arc<DebugSession>> {
        self.by_policy
            .get(policy_id)?
            .iter()
            .filter_map(|task_id| self.sessions.get(task_id))
            .find(|session| !session.is_terminated() && !session.state().is_stopped())
    }
}

/// Registry state shared with sessions, which hold it weakly.
///
/// Lock order: the registry lock may be held while taking a session lock, never the
/// reverse.
#[derive(Debug)]
pub(crate) struct RegistryShared {
    config: Arc<DebuggerConfig>,
    state: Mutex<RegistryState>,
}

impl RegistryShared {
    /// Arms `session`, refusing when another session for the same policy is armed.
    pub(crate) fn start_session(&self, session: &DebugSession) -> DebugResult<()> {
        let state = self.state.lock();
        if !state.sessions.contains_key(&session.task_id()) {
            return Err(SessionError::UnknownTask(session.task_id()));
        }
        if let Some(active) = state.active_for_policy(session.policy_id()) {
            if active.task_id() != session.task_id() {
                tracing::warn!(
                    target: "stepdebug.registry",
                    policy_id = %session.policy_id(),
                    task_id = %session.task_id(),
                    active_task_id = %active.task_id(),
                    "refusing to start a second debug session for policy"
                );
                return Err(SessionError::SessionConflict {
                    policy_id: session.policy_id().clone(),
                    active_task_id: active.task_id(),
                });
            }
        }
        session.begin()
    }

    pub(crate) fn remove_session(&self, task_id: TaskId, policy_id: &PolicyId) {
        let mut state = self.state.lock();
        if state.sessions.remove(&task_id).is_none() {
            return;
        }
        if let Some(tasks) = state.by_policy.get_mut(policy_id) {
            tasks.remove(&task_id);
            if tasks.is_empty() {
                state.by_policy.remove(policy_id);
            }
        }
        tracing::debug!(
            target: "stepdebug.registry",
            task_id = %task_id,
            policy_id = %policy_id,
            "debug session removed"
        );
    }
}

/// Process-wide table of debug sessions, keyed by task id and indexed by policy.
///
/// Cloning is cheap and yields a handle to the same registry.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    shared: Arc<RegistryShared>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DebuggerConfig::default())
    }
}

impl SessionRegistry {
    pub fn new(config: DebuggerConfig) -> Self {
        Self {
            shared: Arc::new(RegistryShared {
                config: Arc::new(config),
                state: Mutex::new(RegistryState::default()),
            }),
        }
    }

    pub fn config(&self) -> &DebuggerConfig {
        &self.shared.config
    }

    /// Creates a new, stopped session for `policy_id`.
    pub fn create(&self, policy_id: impl Into<PolicyId>) -> Arc<DebugSession> {
        let policy_id = policy_id.into();
        let task_id = TaskId::new_random();
        let session = Arc::new(DebugSession::new(
            task_id,
            policy_id.clone(),
            Arc::clone(&self.shared.config),
            Arc::downgrade(&self.shared),
        ));

        let mut state = self.shared.state.lock();
        state.sessions.insert(task_id, Arc::clone(&session));
        state
            .by_policy
            .entry(policy_id.clone())
            .or_default()
            .insert(task_id);
        drop(state);

        tracing::info!(
            target: "stepdebug.registry",
            task_id = %task_id,
            policy_id = %policy_id,
            "debug session created"
        );
        session
    }

    pub fn get(&self, task_id: TaskId) -> Option<Arc<DebugSession>> {
        self.shared.state.lock().sessions.get(&task_id).cloned()
    }

    pub fn start(&self, task_id: TaskId) -> DebugResult<()> {
        let state = self.shared.state.lock();
        let session = state
            .sessions
            .get(&task_id)
            .cloned()
            .ok_or(SessionError::UnknownTask(task_id))?;
        drop(state);
        self.shared.start_session(&session)
    }

    /// Terminates and removes the session. Unknown ids are ignored, so repeated calls are
    /// harmless.
    pub fn terminate(&self, task_id: TaskId) {
        let session = self.get(task_id);
        if let Some(session) = session {
            session.terminate();
        }
    }

    /// The armed session for `policy_id`, if a debugger is waiting for its next request.
    pub fn armed_session_for_policy(&self, policy_id: &PolicyId) -> Option<Arc<DebugSession>> {
        let state = self.shared.state.lock();
        state
            .by_policy
            .get(policy_id)?
            .iter()
            .filter_map(|task_id| state.sessions.get(task_id))
            .find(|session| session.state() == DebugState::Started)
            .cloned()
    }

    /// Entry point for the interpreter: binds an incoming request for `policy_id` to its
    /// armed session.
    ///
    /// Returns `None` when nobody is debugging the policy; the request then runs without
    /// any debugger involvement.
    pub fn attach(&self, policy_id: &PolicyId) -> Option<MessageDebugger> {
        let session = self.armed_session_for_policy(policy_id)?;
        let ticket = session.on_message_arrived()?;
        Some(MessageDebugger::new(session, ticket))
    }

    /// Every live session, ordered by policy then task id.
    pub fn sessions(&self) -> Vec<Arc<DebugSession>> {
        let state = self.shared.state.lock();
        let mut sessions: Vec<_> = state.sessions.values().cloned().collect();
        drop(state);
        sessions.sort_by(|a, b| {
            a.policy_id()
                .cmp(b.policy_id())
                .then_with(|| a.task_id().cmp(&b.task_id()))
        });
        sessions
    }

    /// Terminates every session. Used at shutdown.
    pub fn clean_up(&self) {
        let drained: Vec<Arc<DebugSession>> = {
            let mut state = self.shared.state.lock();
            state.by_policy.clear();
            state.sessions.drain().map(|(_, session)| session).collect()
        };
        let count = drained.len();
        for session in drained {
            session.mark_terminated();
        }
        tracing::info!(
            target: "stepdebug.registry",
            sessions = count,
            "debug registry cleaned up"
        );
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
