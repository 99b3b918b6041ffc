//! Integration tests for wiring the runtime from configuration.

use std::fs;
use std::sync::Arc;

use agent_relay::config::GlobalConfig;
use agent_relay::models::job::{JobOrigin, JobStatus};
use agent_relay::models::turn::{InboundMessage, TurnOutcome};
use agent_relay::persistence::session_store::MemorySessionStore;
use agent_relay::state::AppState;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::test_helpers::{destination, wait_archived, RecordingSink, ScriptedExecutor, Step};

fn config_with_audit(root: &std::path::Path) -> GlobalConfig {
    let toml = format!(
        r#"
audit_dir = '{audit}'

[interrupts]
default_timeout_seconds = 60

[jobs]
archive_dir = '{archive}'
max_concurrent = 2
"#,
        audit = root.join("audit").display(),
        archive = root.join("jobs").display(),
    );
    GlobalConfig::from_toml_str(&toml).expect("valid config")
}

#[tokio::test]
async fn built_state_audits_interrupts_and_jobs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_with_audit(dir.path());
    let sink = Arc::new(RecordingSink::default());
    let executor = ScriptedExecutor::new(vec![
        Step::ask("int-1", "Proceed?"),
        Step::reply("proceeding"),
        Step::reply("job done"),
    ]);
    let state = AppState::build(
        config,
        executor,
        sink.clone(),
        Arc::new(MemorySessionStore::new()),
    )
    .expect("state");
    let cancel = CancellationToken::new();

    let outcome = state
        .flow
        .process(&InboundMessage::new(destination(), "u", "go"), &cancel)
        .await
        .expect("turn");
    assert!(matches!(outcome, TurnOutcome::Suspended { .. }));
    let outcome = state
        .flow
        .process(&InboundMessage::new(destination(), "u", "yes"), &cancel)
        .await
        .expect("resume");
    assert_eq!(outcome, TurnOutcome::Completed("proceeding".into()));

    let id = state
        .jobs
        .start_job("nightly report", JobOrigin::new(destination(), "ops"))
        .await
        .expect("start");
    let snapshot = wait_archived(&state.jobs, &id.to_string()).await;
    assert_eq!(snapshot.record.status, JobStatus::Finished);
    state.shutdown().await;

    let audit_file = dir
        .path()
        .join("audit")
        .join(format!("audit-{}.jsonl", Utc::now().date_naive()));
    let lines = fs::read_to_string(audit_file).expect("audit file");
    let events: Vec<String> = lines
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).expect("json line");
            value["event_type"].as_str().expect("event type").to_owned()
        })
        .collect();
    for expected in [
        "interrupt_registered",
        "interrupt_resolved",
        "job_started",
        "job_completed",
    ] {
        assert!(
            events.iter().any(|event| event == expected),
            "missing {expected} in {events:?}"
        );
    }

    let texts = sink.texts();
    assert!(texts.iter().any(|text| text.contains("Proceed?")));
    assert!(texts.iter().any(|text| text == "Job 000001 finished: job done"));
}
