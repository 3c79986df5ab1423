// Consolidated integration test suite, compiled into the single `tests` binary.
mod admin_json;
mod conflict;
mod lifecycle;
mod long_poll;
