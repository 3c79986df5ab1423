use std::time::Instant;

use gateway_stepdebug::{AdminResponse, DebugAdmin, Position, SUCCESS_MESSAGE};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use crate::harness::{finish, flat_fixture, send_request, POLICY, WAIT};

fn call(admin: &DebugAdmin, request: Value) -> AdminResponse {
    let text = admin.handle_json(&request.to_string());
    serde_json::from_str(&text).expect("responses are always valid JSON")
}

/// Long-polls through the JSON surface until `done` holds for the session result.
fn poll_until(admin: &DebugAdmin, task_id: &str, done: impl Fn(&Value) -> bool) -> Value {
    let deadline = Instant::now() + WAIT;
    let current = call(admin, json!({ "command": "getResult", "taskId": task_id }));
    let mut last = current.body.expect("result body");
    while !done(&last) {
        assert!(Instant::now() < deadline, "last result: {last}");
        let response = call(
            admin,
            json!({ "command": "waitForUpdates", "taskId": task_id, "timeoutMillis": 200 }),
        );
        assert!(response.success);
        if let Some(body) = response.body {
            last = body;
        }
    }
    last
}

#[test]
fn drives_a_debug_session_over_json() {
    let admin = DebugAdmin::default();

    let created = call(&admin, json!({ "command": "createSession", "policyId": POLICY }));
    assert!(created.success);
    let task_id = created.body.as_ref().and_then(|body| body["taskId"].as_str()).expect("taskId").to_owned();

    let toggled = call(
        &admin,
        json!({ "command": "toggleBreakpoint", "taskId": task_id, "position": [6] }),
    );
    assert_eq!(toggled.body, Some(json!({ "enabled": true })));
    assert!(call(&admin, json!({ "command": "start", "taskId": task_id })).success);

    let worker = send_request(admin.registry(), &flat_fixture());
    let paused = poll_until(&admin, &task_id, |result| result["state"] == "AT_BREAKPOINT");
    assert_eq!(paused["currentPosition"], json!([6]));
    assert_eq!(paused["breakpoints"], json!([[6]]));

    let stepped = call(
        &admin,
        json!({ "command": "stepOver", "taskId": task_id, "target": [9] }),
    );
    assert_eq!(stepped.body, Some(json!({ "status": "applied" })));
    let landed = poll_until(&admin, &task_id, |result| {
        result["state"] == "AT_BREAKPOINT" && result["currentPosition"] == json!([12])
    });
    assert_eq!(landed["currentNode"]["displayName"], "Return Response");

    call(&admin, json!({ "command": "resume", "taskId": task_id }));
    finish(worker);
    let done = poll_until(&admin, &task_id, |result| !result["outcomeMessage"].is_null());
    assert_eq!(done["outcomeMessage"], SUCCESS_MESSAGE);
    assert_eq!(done["state"], "STOPPED");

    let listed = call(&admin, json!({ "command": "listSessions" }));
    let sessions = listed.body.expect("listing")["sessions"].clone();
    assert_eq!(sessions.as_array().map(Vec::len), Some(1));
    assert_eq!(sessions[0]["policyId"], POLICY);
    assert_eq!(sessions[0]["breakpointCount"], 1);

    assert!(call(&admin, json!({ "command": "terminate", "taskId": task_id })).success);
    assert!(call(&admin, json!({ "command": "terminate", "taskId": task_id })).success);
    let gone = call(&admin, json!({ "command": "getResult", "taskId": task_id }));
    assert!(!gone.success);
    assert!(
        gone.message.as_deref().is_some_and(|message| message.contains("unknown debug task")),
        "{gone:?}"
    );
}

#[test]
fn conflicting_start_is_an_error_response() {
    let admin = DebugAdmin::default();
    let first = admin.create_session(POLICY);
    let second = admin.create_session(POLICY);
    admin.start(first).expect("start");

    let response = call(
        &admin,
        json!({ "command": "start", "taskId": second.to_string() }),
    );
    assert!(!response.success);
    let message = response.message.unwrap_or_default();
    assert!(message.contains(&first.to_string()), "{message}");
}

#[test]
fn stepping_an_idle_session_is_ignored_not_failed() {
    let admin = DebugAdmin::default();
    let task_id = admin.create_session(POLICY).to_string();

    for command in ["resume", "stepInto"] {
        let response = call(&admin, json!({ "command": command, "taskId": task_id }));
        assert!(response.success, "{command}");
        assert_eq!(response.body, Some(json!({ "status": "ignored" })));
    }
    let response = call(
        &admin,
        json!({ "command": "stepOut", "taskId": task_id, "target": [2, 1] }),
    );
    assert_eq!(response.body, Some(json!({ "status": "ignored" })));
}

#[test]
fn invalid_positions_are_rejected_without_echoing_input() {
    let admin = DebugAdmin::default();
    let task_id = admin.create_session(POLICY).to_string();

    let response = call(
        &admin,
        json!({ "command": "toggleBreakpoint", "taskId": task_id, "position": [] }),
    );
    assert!(!response.success);

    let response = call(
        &admin,
        json!({ "command": "addUserContextVariable", "taskId": task_id, "name": 42 }),
    );
    assert!(!response.success);
    assert!(admin.registry().get(task_id.parse().expect("task id")).is_some());
}

#[test]
fn independent_controllers_each_see_every_version() {
    let admin = DebugAdmin::default();
    let task_id = admin.create_session(POLICY);
    let seen = admin.session_result(task_id).expect("result").version;

    admin
        .toggle_breakpoint(task_id, Position::line(4).expect("position"))
        .expect("toggle");

    let poll = json!({
        "command": "waitForUpdates",
        "taskId": task_id.to_string(),
        "timeoutMillis": 200,
        "sinceVersion": seen,
    });
    let first = call(&admin, poll.clone()).body.expect("first controller update");
    let second = call(&admin, poll).body.expect("second controller update");
    assert_eq!(first["breakpoints"], json!([[4]]));
    assert_eq!(first, second);

    // The shared cursor is untouched, so a plain long-poll still reports the toggle.
    let shared = call(
        &admin,
        json!({ "command": "waitForUpdates", "taskId": task_id.to_string(), "timeoutMillis": 200 }),
    );
    assert_eq!(shared.body, Some(first));
}
