use gateway_stepdebug::{DebugState, PolicyOutcome, SessionRegistry, SUCCESS_MESSAGE};
use pretty_assertions::assert_eq;

use crate::harness::{
    all, failing, finish, flat_fixture, leaf, paused_at, policy_id, pos, send_request,
    wait_for_outcome, Policy, FLAT_VISIT_ORDER, POLICY,
};

#[test]
fn stop_releases_the_parked_worker() {
    let registry = SessionRegistry::default();
    let session = registry.create(POLICY);
    session.toggle_breakpoint(pos(&[3]));
    session.toggle_breakpoint(pos(&[8]));
    session.start().expect("start");

    let worker = send_request(&registry, &flat_fixture());
    assert_eq!(paused_at(&session), pos(&[3]));
    session.stop();

    let report = finish(worker);
    assert_eq!(report.visited.len(), FLAT_VISIT_ORDER.len());
    assert_eq!(session.state(), DebugState::Stopped);
    assert!(registry.get(session.task_id()).is_some());
}

#[test]
fn stopped_request_still_reports_its_outcome() {
    let registry = SessionRegistry::default();
    let session = registry.create(POLICY);
    session.toggle_breakpoint(pos(&[3]));
    session.start().expect("start");

    let worker = send_request(&registry, &flat_fixture());
    assert_eq!(paused_at(&session), pos(&[3]));
    session.stop();

    let report = finish(worker);
    assert!(report.debugged);
    assert_eq!(report.outcome, PolicyOutcome::Success);
    let result = session.result();
    assert_eq!(result.outcome_message.as_deref(), Some(SUCCESS_MESSAGE));
    assert_eq!(result.state, DebugState::Stopped);
}

#[test]
fn failing_policy_reports_status_and_position() {
    let policy = Policy::flat(all(vec![
        leaf("Require HTTP Method"),
        failing("Check Header", "Assertion Falsified"),
        leaf("Never Reached"),
    ]));
    let registry = SessionRegistry::default();
    let session = registry.create(POLICY);
    session.start().expect("start");

    let report = finish(send_request(&registry, &policy));
    assert!(!report.visited.contains(&pos(&[4])));

    let result = wait_for_outcome(&session);
    assert_eq!(
        result.outcome_message.as_deref(),
        Some("Policy failed with status 'Assertion Falsified' at assertion 3.")
    );
    assert_eq!(result.state, DebugState::Stopped);
}

#[test]
fn dropped_guard_reports_an_aborted_run() {
    let registry = SessionRegistry::default();
    let session = registry.create(POLICY);
    session.start().expect("start");

    let debugger = registry.attach(&policy_id()).expect("armed");
    assert_eq!(session.state(), DebugState::BreakAtNextBreakpoint);
    drop(debugger);

    assert_eq!(session.state(), DebugState::Stopped);
    assert_eq!(
        session.outcome_message(),
        Some(PolicyOutcome::Aborted.message())
    );
}

#[test]
fn request_arriving_while_paused_runs_undebugged() {
    let registry = SessionRegistry::default();
    let session = registry.create(POLICY);
    session.toggle_breakpoint(pos(&[3]));
    session.start().expect("start");

    let first = send_request(&registry, &flat_fixture());
    assert_eq!(paused_at(&session), pos(&[3]));

    let second = finish(send_request(&registry, &flat_fixture()));
    assert!(!second.debugged);
    assert_eq!(second.outcome, PolicyOutcome::Success);
    assert_eq!(paused_at(&session), pos(&[3]));

    session.resume();
    assert!(finish(first).debugged);
}

#[test]
fn next_request_is_debugged_after_a_restart() {
    let registry = SessionRegistry::default();
    let session = registry.create(POLICY);
    session.start().expect("start");
    finish(send_request(&registry, &flat_fixture()));
    assert_eq!(
        session.outcome_message().as_deref(),
        Some(SUCCESS_MESSAGE)
    );

    // Finished sessions stay stopped until the controller arms them again.
    assert!(!finish(send_request(&registry, &flat_fixture())).debugged);

    session.toggle_breakpoint(pos(&[12]));
    session.start().expect("restart");
    assert_eq!(session.outcome_message(), None);
    let worker = send_request(&registry, &flat_fixture());
    assert_eq!(paused_at(&session), pos(&[12]));
    session.resume();
    assert!(finish(worker).debugged);
}

#[test]
fn clean_up_terminates_every_session() {
    let registry = SessionRegistry::default();
    let session = registry.create(POLICY);
    let idle = registry.create("other_policy");
    session.toggle_breakpoint(pos(&[2]));
    session.start().expect("start");

    let worker = send_request(&registry, &flat_fixture());
    assert_eq!(paused_at(&session), pos(&[2]));

    registry.clean_up();
    finish(worker);

    assert!(registry.is_empty());
    assert!(session.is_terminated());
    assert!(idle.is_terminated());
    assert!(registry.get(session.task_id()).is_none());
}
