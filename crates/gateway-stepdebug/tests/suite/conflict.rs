use gateway_stepdebug::{DebugState, PolicyId, SessionError, SessionRegistry, SUCCESS_MESSAGE};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

use crate::harness::{finish, flat_fixture, paused_at, policy_id, pos, send_request, POLICY};

#[test]
fn second_session_conflicts_while_first_is_paused() {
    let registry = SessionRegistry::default();
    let first = registry.create(POLICY);
    let second = registry.create(POLICY);

    first.toggle_breakpoint(pos(&[3]));
    first.start().expect("first start");
    let expected = Err(SessionError::SessionConflict {
        policy_id: policy_id(),
        active_task_id: first.task_id(),
    });
    assert_eq!(second.start(), expected);

    let worker = send_request(&registry, &flat_fixture());
    assert_eq!(paused_at(&first), pos(&[3]));
    assert_eq!(registry.start(second.task_id()), expected);
    assert_eq!(second.state(), DebugState::Stopped);

    first.terminate();
    let report = finish(worker);
    assert!(report.debugged);
    assert_eq!(report.outcome.message(), SUCCESS_MESSAGE);

    second.start().expect("start once the first session is gone");
    assert_eq!(second.state(), DebugState::Started);
}

#[test]
fn finished_session_no_longer_blocks_the_policy() {
    let registry = SessionRegistry::default();
    let first = registry.create(POLICY);
    let second = registry.create(POLICY);

    first.start().expect("start");
    finish(send_request(&registry, &flat_fixture()));
    assert_eq!(first.state(), DebugState::Stopped);

    second.start().expect("first run completed");
    assert_eq!(
        first.start(),
        Err(SessionError::SessionConflict {
            policy_id: policy_id(),
            active_task_id: second.task_id(),
        })
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn one_armed_session_per_policy(policy in "[a-z][a-z0-9_.-]{0,15}", extra in 1usize..4) {
        let registry = SessionRegistry::default();
        let policy_id = PolicyId::from(policy.as_str());
        let armed = registry.create(policy_id.clone());
        armed.start().expect("first start");

        for _ in 0..extra {
            let other = registry.create(policy_id.clone());
            let conflict = other.start().expect_err("conflict");
            prop_assert_eq!(
                conflict,
                SessionError::SessionConflict {
                    policy_id: policy_id.clone(),
                    active_task_id: armed.task_id(),
                }
            );
            prop_assert_eq!(other.state(), DebugState::Stopped);
        }

        let unrelated = registry.create(format!("{policy}-other"));
        prop_assert!(unrelated.start().is_ok());
    }
}
