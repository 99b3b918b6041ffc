//! Unit tests for interrupt, turn and job models.

use agent_relay::models::interrupt::{Destination, InterruptKind, InterruptRequest};
use agent_relay::models::job::{JobId, JobOrigin, JobRecord, JobStatus};
use agent_relay::models::turn::{InboundMessage, InterruptSignal, TurnOutcome};
use agent_relay::AppError;
use chrono::{Duration, Utc};

#[test]
fn session_key_defaults_to_destination() {
    let mut message = InboundMessage::new(Destination::new("slack", "C42"), "U1", "hi");
    assert_eq!(message.session_key(), "slack:C42");
    message.session_key = Some("custom".into());
    assert_eq!(message.session_key(), "custom");
}

#[test]
fn suspended_outcome_renders_interrupt_signal() {
    let outcome = TurnOutcome::Suspended {
        checkpoint_id: "slack:C42:17".into(),
        interrupt_id: "int-9".into(),
    };
    let raw = outcome.signal().expect("signal").to_string();
    assert_eq!(raw, "INTERRUPT:slack:C42:17:int-9");
    assert!(InterruptSignal::is_signal(&raw));
    assert!(TurnOutcome::Completed("done".into()).signal().is_none());
}

#[test]
fn malformed_signals_are_rejected() {
    for raw in ["hello", "INTERRUPT:", "INTERRUPT:cp-only", "INTERRUPT::int"] {
        let err = raw.parse::<InterruptSignal>().expect_err(raw);
        assert!(matches!(err, AppError::ValidationFailed(_)), "{raw}");
    }
}

#[test]
fn request_expiry_is_strictly_after_deadline() {
    let now = Utc::now();
    let request = InterruptRequest::new("cp", "s", "q").with_expires_at(now);
    assert!(!request.is_expired_at(now));
    assert!(request.is_expired_at(now + Duration::milliseconds(1)));
    assert!(!InterruptRequest::new("cp", "s", "q").is_expired());
}

#[test]
fn interrupt_kind_serializes_snake_case() {
    assert_eq!(
        serde_json::to_value(InterruptKind::FileOperation).expect("serialize"),
        serde_json::json!("file_operation")
    );
    assert_eq!(InterruptKind::Custom("deploy".into()).to_string(), "custom:deploy");
}

#[test]
fn job_id_serializes_as_padded_string() {
    let record = JobRecord {
        id: JobId::from_counter(42),
        work: "w".into(),
        status: JobStatus::Finished,
        result: String::new(),
        session_key: String::new(),
        destination: Destination::default(),
        owner: String::new(),
        created_at: Utc::now(),
        completed_at: None,
    };
    let value = serde_json::to_value(&record).expect("serialize");
    assert_eq!(value["id"], "000042");
    assert_eq!(value["status"], "finished");

    let back: JobRecord = serde_json::from_value(value).expect("deserialize");
    assert_eq!(back.id, record.id);
}

#[test]
fn terminal_statuses() {
    assert!(!JobStatus::Pending.is_terminal());
    assert!(!JobStatus::Running.is_terminal());
    assert!(JobStatus::Finished.is_terminal());
    assert!(JobStatus::Failed.is_terminal());
    assert!(JobStatus::Stopped.is_terminal());
}

#[test]
fn job_origin_derives_session_key() {
    let origin = JobOrigin::new(Destination::new("telegram", "7"), "alice");
    assert_eq!(origin.session_key, "telegram:7");
    assert_eq!(origin.owner, "alice");
}
