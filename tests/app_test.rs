use std::collections::BTreeSet;
use std::sync::Arc;

use watchpost::app::{Environment, Watchpost};
use watchpost::cache::{Cache, InMemoryStorage};
use watchpost::check::{Check, CheckFunction};
use watchpost::result::{CheckResult, CheckState, RawCheckOutput};

fn build_app() -> Watchpost {
    Watchpost::new("linux", Cache::new(Arc::new(InMemoryStorage::new())), "prod")
}

#[tokio::test]
async fn run_checks_once_emits_checkmk_framing() {
    let app = build_app();
    app.register_environment(Environment::new("prod"));
    app.register_check(Check::new(
        "disk_space",
        CheckFunction::sync(|_ctx| Ok(RawCheckOutput::Single(CheckResult::ok("78% used")))),
        BTreeSet::from(["prod".to_string()]),
    ));

    let output = app.run_checks_once().await;
    let text = String::from_utf8(output).unwrap();

    assert!(text.starts_with("<<<check_mk>>>\n"));
    assert!(text.contains("AgentOS: linux\n"));
    assert!(text.contains("<<<<prod>>>>\n"));
}

#[tokio::test]
async fn checks_for_unregistered_environment_still_attempt_to_run() {
    let app = build_app();
    app.register_check(Check::new(
        "probe",
        CheckFunction::sync(|_ctx| Ok(RawCheckOutput::Single(CheckResult::ok("up")))),
        BTreeSet::from(["ghost-env".to_string()]),
    ));

    let output = app.run_checks_once().await;
    let text = String::from_utf8(output).unwrap();
    assert!(text.contains("<<<<ghost-env>>>>\n"));
}

#[tokio::test]
async fn crit_from_one_check_does_not_affect_other_checks() {
    let app = build_app();
    app.register_environment(Environment::new("prod"));
    app.register_check(Check::new(
        "failing",
        CheckFunction::sync(|_ctx| Ok(RawCheckOutput::Single(CheckResult::crit("disk full")))),
        BTreeSet::from(["prod".to_string()]),
    ));
    app.register_check(Check::new(
        "healthy",
        CheckFunction::sync(|_ctx| Ok(RawCheckOutput::Single(CheckResult::ok("fine")))),
        BTreeSet::from(["prod".to_string()]),
    ));

    let checks = app.checks.read().clone();
    let mut states = Vec::new();
    for check in checks {
        states.push(app.run_check(&check, "prod").await.unwrap().state);
    }
    assert!(states.contains(&CheckState::Crit));
    assert!(states.contains(&CheckState::Ok));
}
