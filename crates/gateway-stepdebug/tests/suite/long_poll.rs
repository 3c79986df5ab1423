use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use gateway_stepdebug::{DebugAdmin, DebuggerConfig, SessionRegistry, TaskId};
use pretty_assertions::assert_eq;

use crate::harness::{finish, flat_fixture, paused_at, pos, send_request, POLICY, WAIT};

const SHORT: Duration = Duration::from_millis(50);

#[test]
fn no_update_without_a_mutation() {
    let registry = SessionRegistry::default();
    let session = registry.create(POLICY);

    assert_eq!(session.wait_for_updates(SHORT), None);

    session.toggle_breakpoint(pos(&[2]));
    let update = session.wait_for_updates(SHORT).expect("toggle is an update");
    assert_eq!(update.breakpoints, vec![pos(&[2])]);

    assert_eq!(session.wait_for_updates(SHORT), None);
}

#[test]
fn coalesced_mutations_are_delivered_once() {
    let registry = SessionRegistry::default();
    let session = registry.create(POLICY);

    session.toggle_breakpoint(pos(&[2]));
    session.toggle_breakpoint(pos(&[3]));
    let update = session.wait_for_updates(SHORT).expect("update");
    assert_eq!(update.version, session.version());
    assert_eq!(update.breakpoints, vec![pos(&[2]), pos(&[3])]);
    assert_eq!(session.wait_for_updates(SHORT), None);
}

#[test]
fn concurrent_mutation_wakes_the_waiter() {
    let registry = SessionRegistry::default();
    let session = registry.create(POLICY);

    let mutator = {
        let session = Arc::clone(&session);
        thread::spawn(move || {
            thread::sleep(SHORT);
            session.toggle_breakpoint(pos(&[7]));
        })
    };

    let started = Instant::now();
    let update = session.wait_for_updates(WAIT).expect("woken by the toggle");
    assert!(started.elapsed() < WAIT);
    assert_eq!(update.breakpoints, vec![pos(&[7])]);
    mutator.join().expect("mutator");
}

#[test]
fn racing_mutations_are_never_lost_or_repeated() {
    const TOGGLES: u64 = 200;

    let registry = SessionRegistry::default();
    let session = registry.create(POLICY);
    let base = session.version();

    let mutator = {
        let session = Arc::clone(&session);
        thread::spawn(move || {
            for round in 0..TOGGLES {
                session.toggle_breakpoint(pos(&[(round % 5) as u32 + 1]));
                if round % 16 == 0 {
                    thread::yield_now();
                }
            }
        })
    };

    let deadline = Instant::now() + WAIT;
    let mut seen = Vec::new();
    while seen.last() != Some(&(base + TOGGLES)) {
        assert!(Instant::now() < deadline, "last versions seen: {seen:?}");
        if let Some(update) = session.wait_for_updates(Duration::from_millis(500)) {
            seen.push(update.version);
        }
    }
    mutator.join().expect("mutator");

    assert!(seen.windows(2).all(|pair| pair[0] < pair[1]), "{seen:?}");
    assert_eq!(session.wait_for_updates(SHORT), None);
}

#[test]
fn terminate_unblocks_the_worker_and_pending_polls() {
    let registry = SessionRegistry::default();
    let session = registry.create(POLICY);
    session.toggle_breakpoint(pos(&[2]));
    session.start().expect("start");

    let worker = send_request(&registry, &flat_fixture());
    assert_eq!(paused_at(&session), pos(&[2]));

    let seen = session.version();
    let poller = {
        let session = Arc::clone(&session);
        thread::spawn(move || session.wait_for_updates_since(seen, WAIT))
    };

    session.terminate();
    finish(worker);

    let update = poller
        .join()
        .expect("poller")
        .expect("terminate is an update");
    assert!(update.terminated);
    assert!(registry.get(session.task_id()).is_none());
}

#[test]
fn long_poll_timeouts_are_clamped() {
    let config = DebuggerConfig {
        max_wait_for_updates_ms: 20,
        ..DebuggerConfig::default()
    };
    let registry = SessionRegistry::new(config);
    let session = registry.create(POLICY);

    let started = Instant::now();
    assert_eq!(session.wait_for_updates(Duration::from_secs(60)), None);
    assert!(started.elapsed() < WAIT);
}

#[test]
fn polling_an_unknown_task_reports_no_update() {
    let admin = DebugAdmin::default();
    assert_eq!(admin.wait_for_updates(TaskId::new_random(), 10), None);
}
