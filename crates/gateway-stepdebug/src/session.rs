//! Per-task debug state machine and the rendezvous between a worker thread running a
//! policy and the controller driving the debugger.
//!
//! All state lives behind one mutex. A paused worker waits on `resume`; controller
//! long-polls wait on `updates`. Every mutation bumps `version` under the lock, which is
//! what long-polls compare against, so a change can never slip between a check and a wait.

use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::config::DebuggerConfig;
use crate::error::{DebugResult, SessionError};
use crate::node::NodeDescriptor;
use crate::position::Position;
use crate::registry::{PolicyId, RegistryShared, TaskId};
use crate::result::{SessionResult, SessionSummary};
use crate::state::{CommandStatus, DebugState};
use crate::variables::{VariableResolver, VariableSnapshot};

pub const SUCCESS_MESSAGE: &str = "Policy completed successfully.";

/// How a policy run ended, as reported by the interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyOutcome {
    Success,
    Failure {
        /// Assertion status text, verbatim.
        status: String,
        /// Position of the failing assertion, when known.
        position: Option<Position>,
    },
    /// The worker gave up on the request without reporting an outcome.
    Aborted,
}

impl PolicyOutcome {
    pub fn failure(status: impl Into<String>, position: Option<Position>) -> Self {
        Self::Failure {
            status: status.into(),
            position,
        }
    }

    pub fn message(&self) -> String {
        match self {
            PolicyOutcome::Success => SUCCESS_MESSAGE.to_owned(),
            PolicyOutcome::Failure {
                status,
                position: Some(position),
            } => format!("Policy failed with status '{status}' at assertion {position}."),
            PolicyOutcome::Failure {
                status,
                position: None,
            } => format!("Policy failed with status '{status}'."),
            PolicyOutcome::Aborted => "Policy processing was aborted before completion.".to_owned(),
        }
    }
}

/// Identifies the request currently bound to a session.
///
/// Node visits carrying a ticket that is no longer bound (the session was stopped, restarted
/// or terminated in the meantime) are ignored. The outcome of a stopped request is still
/// recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageTicket(u64);

#[derive(Debug, Clone)]
struct StepRequest {
    target: Position,
    /// Position that was current when the step was issued.
    origin: Option<Position>,
}

impl StepRequest {
    /// A step lands on its literal target, or on the first node reached after the target in
    /// document order when the target sits in a branch that never runs. Nodes nested under
    /// the origin do not count unless the target itself is nested there.
    fn lands_at(&self, position: &Position) -> bool {
        if *position == self.target {
            return true;
        }
        if *position < self.target {
            return false;
        }
        match &self.origin {
            Some(origin) => !origin.is_ancestor_of(position) || origin.is_ancestor_of(&self.target),
            None => true,
        }
    }
}

#[derive(Debug, Default)]
struct SessionInner {
    state: DebugState,
    current_position: Option<Position>,
    current_node: Option<NodeDescriptor>,
    breakpoints: BTreeSet<Position>,
    step: Option<StepRequest>,
    terminated: bool,
    version: u64,
    /// Last version handed out by `wait_for_updates`.
    delivered_version: u64,
    variables: VariableSnapshot,
    extra_variable_names: BTreeSet<String>,
    outcome_message: Option<String>,
    attached: Option<MessageTicket>,
    /// Request whose outcome is still owed. Survives `stop`, which only detaches the
    /// request; cleared by `begin`, `terminate` and the outcome itself.
    pending_outcome: Option<MessageTicket>,
    next_ticket: u64,
    /// Set while paused when the paused worker must re-capture variables.
    refresh_pending: bool,
}

impl SessionInner {
    fn is_bound(&self, ticket: MessageTicket) -> bool {
        self.attached == Some(ticket) && !self.terminated && !self.state.is_stopped()
    }

    fn is_paused(&self) -> bool {
        self.state == DebugState::AtBreakpoint && !self.terminated
    }

    fn clear_position(&mut self) {
        self.current_position = None;
        self.current_node = None;
    }
}

#[derive(Debug)]
pub struct DebugSession {
    task_id: TaskId,
    policy_id: PolicyId,
    config: Arc<DebuggerConfig>,
    registry: Weak<RegistryShared>,
    inner: Mutex<SessionInner>,
    resume: Condvar,
    updates: Condvar,
}

impl DebugSession {
    pub(crate) fn new(
        task_id: TaskId,
        policy_id: PolicyId,
        config: Arc<DebuggerConfig>,
        registry: Weak<RegistryShared>,
    ) -> Self {
        Self {
            task_id,
            policy_id,
            config,
            registry,
            inner: Mutex::new(SessionInner::default()),
            resume: Condvar::new(),
            updates: Condvar::new(),
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn policy_id(&self) -> &PolicyId {
        &self.policy_id
    }

    pub fn state(&self) -> DebugState {
        self.inner.lock().state
    }

    pub fn current_position(&self) -> Option<Position> {
        self.inner.lock().current_position.clone()
    }

    pub fn current_node(&self) -> Option<NodeDescriptor> {
        self.inner.lock().current_node.clone()
    }

    pub fn breakpoints(&self) -> Vec<Position> {
        self.inner.lock().breakpoints.iter().cloned().collect()
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.lock().terminated
    }

    pub fn version(&self) -> u64 {
        self.inner.lock().version
    }

    pub fn extra_variable_names(&self) -> Vec<String> {
        self.inner.lock().extra_variable_names.iter().cloned().collect()
    }

    pub fn outcome_message(&self) -> Option<String> {
        self.inner.lock().outcome_message.clone()
    }

    pub fn variables(&self) -> VariableSnapshot {
        self.inner.lock().variables.clone()
    }

    /// Current snapshot, without marking it delivered.
    pub fn result(&self) -> SessionResult {
        let inner = self.inner.lock();
        self.result_locked(&inner)
    }

    pub fn summary(&self) -> SessionSummary {
        let inner = self.inner.lock();
        SessionSummary {
            task_id: self.task_id,
            policy_id: self.policy_id.clone(),
            state: inner.state,
            breakpoint_count: inner.breakpoints.len(),
        }
    }

    fn result_locked(&self, inner: &SessionInner) -> SessionResult {
        SessionResult {
            task_id: self.task_id,
            policy_id: self.policy_id.clone(),
            version: inner.version,
            state: inner.state,
            current_position: inner.current_position.clone(),
            current_node: inner.current_node.clone(),
            breakpoints: inner.breakpoints.iter().cloned().collect(),
            variables: inner.variables.to_vec(),
            outcome_message: inner.outcome_message.clone(),
            terminated: inner.terminated,
        }
    }

    /// Records a mutation and wakes controller long-polls.
    fn publish(&self, inner: &mut SessionInner) {
        inner.version = inner.version.wrapping_add(1);
        self.updates.notify_all();
    }

    /// Returns to `STOPPED` and releases any parked worker.
    fn halt(&self, inner: &mut SessionInner) {
        inner.state = DebugState::Stopped;
        inner.attached = None;
        inner.step = None;
        inner.refresh_pending = false;
        inner.clear_position();
        self.resume.notify_all();
    }

    // ---------------------------------------------------------------------------------
    // Interpreter hooks
    // ---------------------------------------------------------------------------------

    /// Binds an incoming request to this session and arms it.
    ///
    /// Only a `STARTED` session accepts a request; while another request is bound (or the
    /// session is stopped) this returns `None` and the request runs without debugging.
    pub fn on_message_arrived(&self) -> Option<MessageTicket> {
        let mut inner = self.inner.lock();
        if inner.terminated || inner.state != DebugState::Started || inner.attached.is_some() {
            return None;
        }

        inner.next_ticket = inner.next_ticket.wrapping_add(1);
        let ticket = MessageTicket(inner.next_ticket);
        inner.attached = Some(ticket);
        inner.pending_outcome = Some(ticket);
        inner.state = DebugState::BreakAtNextBreakpoint;
        inner.outcome_message = None;
        self.publish(&mut inner);

        tracing::debug!(
            target: "stepdebug.session",
            task_id = %self.task_id,
            policy_id = %self.policy_id,
            "request attached to debug session"
        );
        Some(ticket)
    }

    /// Called before the interpreter evaluates `node`. Blocks the calling worker while the
    /// session is paused on that node.
    pub fn on_start_assertion(
        &self,
        ticket: MessageTicket,
        node: &NodeDescriptor,
        resolver: &dyn VariableResolver,
    ) {
        let mut inner = self.inner.lock();
        if !inner.is_bound(ticket) {
            return;
        }

        inner.current_position = Some(node.position.clone());
        inner.current_node = Some(node.clone());
        if !self.refresh_variables(&mut inner, ticket, resolver) {
            return;
        }
        if !inner.is_bound(ticket) {
            return;
        }

        let position = &node.position;
        let pause = match inner.state {
            DebugState::BreakAtNextLine => true,
            DebugState::BreakAtNextBreakpoint => {
                inner.breakpoints.contains(position)
                    || inner
                        .step
                        .as_ref()
                        .is_some_and(|step| step.lands_at(position))
            }
            _ => false,
        };
        if !pause {
            return;
        }

        inner.state = DebugState::AtBreakpoint;
        inner.step = None;
        inner.refresh_pending = false;
        self.publish(&mut inner);
        tracing::debug!(
            target: "stepdebug.session",
            task_id = %self.task_id,
            position = %position,
            node = %node.display_name,
            "paused at assertion"
        );

        self.park(&mut inner, ticket, resolver);
    }

    /// Called exactly once when the bound request completes, successfully or not.
    ///
    /// When `resolver` is given and the request is still being debugged, the variables are
    /// captured one last time so the final snapshot reflects the state the policy finished
    /// in. A request released by [`DebugSession::stop`] still records its outcome; one
    /// outlived by a restart or a terminate does not.
    pub fn on_message_finished(
        &self,
        ticket: MessageTicket,
        outcome: &PolicyOutcome,
        resolver: Option<&dyn VariableResolver>,
    ) {
        let mut inner = self.inner.lock();
        if inner.pending_outcome != Some(ticket) {
            return;
        }
        if let Some(resolver) = resolver {
            if inner.is_bound(ticket) {
                self.refresh_variables(&mut inner, ticket, resolver);
            }
        }
        if inner.terminated || inner.pending_outcome != Some(ticket) {
            return;
        }

        if inner.attached == Some(ticket) {
            self.halt(&mut inner);
        }
        inner.pending_outcome = None;
        inner.outcome_message = Some(outcome.message());
        self.publish(&mut inner);

        tracing::info!(
            target: "stepdebug.session",
            task_id = %self.task_id,
            policy_id = %self.policy_id,
            outcome = ?outcome,
            "debugged request finished"
        );
    }

    /// Blocks the worker until the session leaves `AT_BREAKPOINT`, the request is detached
    /// or the session is terminated.
    fn park(
        &self,
        inner: &mut MutexGuard<'_, SessionInner>,
        ticket: MessageTicket,
        resolver: &dyn VariableResolver,
    ) {
        let poll_interval = self.config.pause_poll_interval();
        loop {
            if !inner.is_bound(ticket) || inner.state != DebugState::AtBreakpoint {
                return;
            }

            if inner.refresh_pending {
                inner.refresh_pending = false;
                self.refresh_variables(inner, ticket, resolver);
                if inner.is_bound(ticket) && inner.state == DebugState::AtBreakpoint {
                    self.publish(inner);
                }
                continue;
            }

            let _ = self.resume.wait_for(inner, poll_interval);
        }
    }

    /// Re-captures variables from `resolver` with the session lock released.
    ///
    /// Returns `false` if the resolver panicked; the previous snapshot is kept.
    fn refresh_variables(
        &self,
        inner: &mut MutexGuard<'_, SessionInner>,
        ticket: MessageTicket,
        resolver: &dyn VariableResolver,
    ) -> bool {
        let names: Vec<String> = inner.extra_variable_names.iter().cloned().collect();
        let limits = &self.config.variables;
        let captured = MutexGuard::unlocked(inner, || {
            catch_unwind(AssertUnwindSafe(|| {
                VariableSnapshot::capture(resolver, names.iter().map(String::as_str), limits)
            }))
        });

        match captured {
            Ok(snapshot) => {
                if inner.is_bound(ticket) {
                    inner.variables = snapshot;
                }
                true
            }
            Err(_) => {
                tracing::warn!(
                    target: "stepdebug.session",
                    task_id = %self.task_id,
                    "variable resolver panicked; keeping previous snapshot"
                );
                false
            }
        }
    }

    // ---------------------------------------------------------------------------------
    // Controller commands
    // ---------------------------------------------------------------------------------

    /// Arms the session so the next request for its policy is debugged.
    ///
    /// Fails with [`SessionError::SessionConflict`] when another session for the same policy
    /// is already armed.
    pub fn start(&self) -> DebugResult<()> {
        match self.registry.upgrade() {
            Some(registry) => registry.start_session(self),
            None => Err(SessionError::UnknownTask(self.task_id)),
        }
    }

    /// Transition to `STARTED`; the caller holds the registry lock and has already ruled
    /// out conflicts.
    pub(crate) fn begin(&self) -> DebugResult<()> {
        let mut inner = self.inner.lock();
        if inner.terminated {
            return Err(SessionError::UnknownTask(self.task_id));
        }
        if !inner.state.is_stopped() {
            return Ok(());
        }

        inner.state = DebugState::Started;
        inner.attached = None;
        inner.pending_outcome = None;
        inner.step = None;
        inner.refresh_pending = false;
        inner.clear_position();
        inner.variables.clear();
        inner.extra_variable_names.clear();
        inner.outcome_message = None;
        self.publish(&mut inner);

        tracing::info!(
            target: "stepdebug.session",
            task_id = %self.task_id,
            policy_id = %self.policy_id,
            "debug session started"
        );
        Ok(())
    }

    /// Stops debugging. A parked worker is released and finishes its request undisturbed,
    /// still reporting its outcome; breakpoints and captured variables are kept.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        self.halt(&mut inner);
        self.publish(&mut inner);
        tracing::info!(
            target: "stepdebug.session",
            task_id = %self.task_id,
            "debug session stopped"
        );
    }

    /// Stops the session for good and removes it from its registry. Idempotent.
    pub fn terminate(&self) {
        self.mark_terminated();
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_session(self.task_id, &self.policy_id);
        }
    }

    /// Returns `true` the first time the session is terminated.
    pub(crate) fn mark_terminated(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.terminated {
            return false;
        }
        inner.terminated = true;
        inner.pending_outcome = None;
        self.halt(&mut inner);
        self.publish(&mut inner);
        tracing::info!(
            target: "stepdebug.session",
            task_id = %self.task_id,
            policy_id = %self.policy_id,
            "debug session terminated"
        );
        true
    }

    /// Runs to the next breakpoint.
    pub fn resume(&self) -> CommandStatus {
        let mut inner = self.inner.lock();
        if !inner.is_paused() {
            return self.ignored("resume");
        }
        inner.state = DebugState::BreakAtNextBreakpoint;
        inner.step = None;
        inner.clear_position();
        self.resume.notify_all();
        self.publish(&mut inner);
        CommandStatus::Applied
    }

    /// Pauses at the very next node visited.
    pub fn step_into(&self) -> CommandStatus {
        let mut inner = self.inner.lock();
        if !inner.is_paused() {
            return self.ignored("step_into");
        }
        inner.state = DebugState::BreakAtNextLine;
        inner.step = None;
        self.resume.notify_all();
        self.publish(&mut inner);
        CommandStatus::Applied
    }

    /// Runs until `target` (normally the next sibling) or the first node after it.
    pub fn step_over(&self, target: Position) -> CommandStatus {
        self.step_to(target, "step_over")
    }

    /// Runs until `target` (normally the parent's next sibling) or the first node after it.
    pub fn step_out(&self, target: Position) -> CommandStatus {
        self.step_to(target, "step_out")
    }

    fn step_to(&self, target: Position, command: &'static str) -> CommandStatus {
        let mut inner = self.inner.lock();
        if !inner.is_paused() {
            return self.ignored(command);
        }
        tracing::debug!(
            target: "stepdebug.session",
            task_id = %self.task_id,
            command,
            step_target = %target,
            "stepping"
        );
        inner.step = Some(StepRequest {
            target,
            origin: inner.current_position.clone(),
        });
        inner.state = DebugState::BreakAtNextBreakpoint;
        self.resume.notify_all();
        self.publish(&mut inner);
        CommandStatus::Applied
    }

    fn ignored(&self, command: &'static str) -> CommandStatus {
        tracing::debug!(
            target: "stepdebug.session",
            task_id = %self.task_id,
            command,
            "command ignored; session is not paused"
        );
        CommandStatus::Ignored
    }

    /// Adds the breakpoint if absent, removes it otherwise. Returns whether it is now set.
    pub fn toggle_breakpoint(&self, position: Position) -> bool {
        let mut inner = self.inner.lock();
        let enabled = if inner.breakpoints.remove(&position) {
            false
        } else {
            inner.breakpoints.insert(position);
            true
        };
        self.publish(&mut inner);
        enabled
    }

    pub fn remove_all_breakpoints(&self) {
        let mut inner = self.inner.lock();
        inner.breakpoints.clear();
        self.publish(&mut inner);
    }

    /// Adds a variable to every subsequent snapshot.
    ///
    /// While paused, the parked worker re-captures variables right away and publishes the
    /// refreshed snapshot; otherwise the change shows up at the next visited node.
    pub fn add_user_context_variable(&self, name: &str) -> DebugResult<()> {
        let name = validate_variable_name(name)?;
        let mut inner = self.inner.lock();
        inner.extra_variable_names.insert(name.to_owned());
        self.request_refresh(&mut inner);
        Ok(())
    }

    pub fn remove_user_context_variable(&self, name: &str) -> DebugResult<()> {
        let name = validate_variable_name(name)?;
        let mut inner = self.inner.lock();
        inner.extra_variable_names.remove(name);
        self.request_refresh(&mut inner);
        Ok(())
    }

    fn request_refresh(&self, inner: &mut SessionInner) {
        if inner.is_paused() && inner.attached.is_some() {
            inner.refresh_pending = true;
            self.resume.notify_all();
        } else {
            self.publish(inner);
        }
    }

    /// Long-polls for a change since the last snapshot this method returned.
    ///
    /// Returns `None` when nothing changed within `timeout` (clamped to the configured
    /// maximum). Each version is delivered at most once across all callers; a controller
    /// that must see every version independently uses
    /// [`DebugSession::wait_for_updates_since`].
    pub fn wait_for_updates(&self, timeout: Duration) -> Option<SessionResult> {
        let deadline = Instant::now() + self.config.clamp_wait(timeout);
        let mut inner = self.inner.lock();
        while inner.version == inner.delivered_version {
            if self.updates.wait_until(&mut inner, deadline).timed_out()
                && inner.version == inner.delivered_version
            {
                return None;
            }
        }
        inner.delivered_version = inner.version;
        Some(self.result_locked(&inner))
    }

    /// Like [`DebugSession::wait_for_updates`], for callers tracking their own cursor.
    /// Does not affect what `wait_for_updates` considers delivered.
    pub fn wait_for_updates_since(
        &self,
        seen_version: u64,
        timeout: Duration,
    ) -> Option<SessionResult> {
        let deadline = Instant::now() + self.config.clamp_wait(timeout);
        let mut inner = self.inner.lock();
        while inner.version == seen_version {
            if self.updates.wait_until(&mut inner, deadline).timed_out()
                && inner.version == seen_version
            {
                return None;
            }
        }
        Some(self.result_locked(&inner))
    }
}

/// Interpreter-side handle for one debugged request.
///
/// Obtained from [`crate::SessionRegistry::attach`]. Forwards node visits to the session
/// and reports the outcome exactly once: dropping the handle without calling
/// [`MessageDebugger::on_message_finished`] reports [`PolicyOutcome::Aborted`].
#[derive(Debug)]
pub struct MessageDebugger {
    session: Arc<DebugSession>,
    ticket: MessageTicket,
    finished: bool,
}

impl MessageDebugger {
    pub(crate) fn new(session: Arc<DebugSession>, ticket: MessageTicket) -> Self {
        Self {
            session,
            ticket,
            finished: false,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.session.task_id()
    }

    pub fn ticket(&self) -> MessageTicket {
        self.ticket
    }

    pub fn session(&self) -> &Arc<DebugSession> {
        &self.session
    }

    /// May block while the session is paused on `node`.
    pub fn on_start_assertion(&self, node: &NodeDescriptor, resolver: &dyn VariableResolver) {
        self.session.on_start_assertion(self.ticket, node, resolver);
    }

    pub fn on_message_finished(
        mut self,
        outcome: &PolicyOutcome,
        resolver: Option<&dyn VariableResolver>,
    ) {
        self.finished = true;
        self.session
            .on_message_finished(self.ticket, outcome, resolver);
    }
}

impl Drop for MessageDebugger {
    fn drop(&mut self) {
        if !self.finished {
            self.session
                .on_message_finished(self.ticket, &PolicyOutcome::Aborted, None);
        }
    }
}

fn validate_variable_name(name: &str) -> DebugResult<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(SessionError::InvalidVariableName(name.to_owned()));
    }
    Ok(trimmed)
}
