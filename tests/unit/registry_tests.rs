//! Unit tests for `InterruptRegistry`.
//!
//! | Scenario | Behaviour |
//! |----------|-----------|
//! | A | Answer before expiry is returned to the waiter; session clears |
//! | B | Answer after expiry returns Expired and removes the entry |

use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_relay::config::InterruptConfig;
use agent_relay::driver::{BoxFuture, MessageSink};
use agent_relay::interrupt::{InterruptHandler, InterruptRegistry};
use agent_relay::models::interrupt::{
    Destination, InterruptKind, InterruptRequest, InterruptStatus, UserResponse,
};
use agent_relay::{AppError, Result};
use chrono::Utc;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<String>>,
}

impl MessageSink for Outbox {
    fn publish(&self, _destination: Destination, text: String) -> BoxFuture<'_, ()> {
        self.sent.lock().expect("outbox lock").push(text);
        Box::pin(async { Ok(()) })
    }
}

fn config(max_pending: usize, history_capacity: usize) -> InterruptConfig {
    InterruptConfig {
        default_timeout_seconds: 60,
        max_pending,
        history_capacity,
    }
}

fn request(checkpoint_id: &str, session_key: &str) -> InterruptRequest {
    InterruptRequest::new(checkpoint_id, session_key, "Deploy now?")
        .with_destination(Destination::new("telegram", "42"))
}

#[tokio::test]
async fn scenario_a_answer_before_expiry_resolves() {
    let outbox = Arc::new(Outbox::default());
    let registry = InterruptRegistry::new(config(10, 10)).with_sink(outbox.clone());

    let registered = registry
        .register(request("cp-1", "telegram:42").with_options(vec!["yes".into(), "no".into()]))
        .await
        .expect("register");
    assert_eq!(registered.status, InterruptStatus::Pending);
    assert!(registered.expires_at.is_some());
    assert_eq!(
        outbox.sent.lock().expect("outbox").clone(),
        vec!["\u{2753} Deploy now?\n1. yes\n2. no"]
    );

    registry
        .submit_response(UserResponse::new("cp-1", "yes"))
        .await
        .expect("submit");
    let response = registry
        .await_response("cp-1", &CancellationToken::new())
        .await
        .expect("await");
    assert_eq!(response.checkpoint_id, "cp-1");
    assert_eq!(response.answer, "yes");

    assert!(registry.get_pending("telegram:42").await.is_none());
    assert_eq!(registry.pending_count().await, 0);
    let history = registry.history(None).await;
    assert_eq!(history[0].status, InterruptStatus::Resolved);
}

#[tokio::test]
async fn scenario_b_late_answer_is_expired_and_removed() {
    let registry = InterruptRegistry::new(config(10, 10));
    registry
        .register(request("cp-1", "telegram:42").with_expires_at(Utc::now() - chrono::Duration::seconds(1)))
        .await
        .expect("register");

    let err = registry
        .submit_response(UserResponse::new("cp-1", "yes"))
        .await
        .expect_err("expired");
    assert!(matches!(err, AppError::Expired(_)));
    assert_eq!(registry.pending_count().await, 0);
    assert!(registry.get_pending("telegram:42").await.is_none());
    assert_eq!(registry.history(None).await[0].status, InterruptStatus::Expired);
}

#[tokio::test]
async fn unknown_checkpoint_is_not_found_and_size_unchanged() {
    let registry = InterruptRegistry::new(config(10, 10));
    registry
        .register(request("cp-1", "telegram:42"))
        .await
        .expect("register");

    let err = registry
        .submit_response(UserResponse::new("cp-404", "yes"))
        .await
        .expect_err("unknown");
    assert!(matches!(err, AppError::NotFound(_)));
    assert_eq!(registry.pending_count().await, 1);
}

#[tokio::test]
async fn pending_lookup_until_clear_or_cancel() {
    let registry = InterruptRegistry::new(config(10, 10));
    registry
        .register(request("cp-1", "chat:a"))
        .await
        .expect("register a");
    registry
        .register(request("cp-2", "chat:b"))
        .await
        .expect("register b");

    assert_eq!(
        registry.get_pending("chat:a").await.expect("a").checkpoint_id,
        "cp-1"
    );
    assert!(registry.clear("cp-1").await.is_some());
    assert!(registry.get_pending("chat:a").await.is_none());

    let cancelled = registry.cancel("cp-2").await.expect("cancel");
    assert_eq!(cancelled.status, InterruptStatus::Cancelled);
    assert!(registry.get_pending("chat:b").await.is_none());
    assert!(matches!(
        registry.cancel("cp-2").await,
        Err(AppError::NotFound(_))
    ));

    let statuses: Vec<_> = registry
        .history(None)
        .await
        .into_iter()
        .map(|r| r.status)
        .collect();
    assert_eq!(
        statuses,
        vec![InterruptStatus::Resolved, InterruptStatus::Cancelled]
    );
}

#[tokio::test]
async fn history_evicts_oldest_first() {
    let registry = InterruptRegistry::new(config(100, 3));
    for n in 1..=5 {
        registry
            .register(request(&format!("cp-{n}"), &format!("chat:{n}")))
            .await
            .expect("register");
    }
    let history = registry.history(None).await;
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].checkpoint_id, "cp-3");
    assert_eq!(registry.history(Some(1)).await[0].checkpoint_id, "cp-5");

    let stats = registry.stats().await;
    assert_eq!(stats.pending, 5);
    assert_eq!(stats.history_len, 3);
    assert_eq!(stats.by_kind.get("ask_user"), Some(&3));
    assert_eq!(stats.by_status.get(&InterruptStatus::Pending), Some(&3));
}

#[tokio::test]
async fn each_waiter_receives_its_own_response() {
    let registry = Arc::new(InterruptRegistry::new(config(10, 10)));
    registry
        .register(request("cp-1", "chat:a"))
        .await
        .expect("register a");
    registry
        .register(request("cp-2", "chat:b"))
        .await
        .expect("register b");

    let waiter_a = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            registry
                .await_response("cp-1", &CancellationToken::new())
                .await
        })
    };
    let waiter_b = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            registry
                .await_response("cp-2", &CancellationToken::new())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    registry
        .submit_response(UserResponse::new("cp-2", "for b"))
        .await
        .expect("submit b");
    registry
        .submit_response(UserResponse::new("cp-1", "for a"))
        .await
        .expect("submit a");

    let a = waiter_a.await.expect("join a").expect("answer a");
    let b = waiter_b.await.expect("join b").expect("answer b");
    assert_eq!((a.checkpoint_id.as_str(), a.answer.as_str()), ("cp-1", "for a"));
    assert_eq!((b.checkpoint_id.as_str(), b.answer.as_str()), ("cp-2", "for b"));
}

#[tokio::test]
async fn second_undelivered_answer_is_backpressure() {
    let registry = InterruptRegistry::new(config(10, 10));
    registry
        .register(request("cp-1", "chat:a"))
        .await
        .expect("register");
    registry
        .submit_response(UserResponse::new("cp-1", "first"))
        .await
        .expect("first");

    let err = registry
        .submit_response(UserResponse::new("cp-1", "second"))
        .await
        .expect_err("second");
    assert!(matches!(err, AppError::Backpressure(_)));

    let response = registry
        .await_response("cp-1", &CancellationToken::new())
        .await
        .expect("await");
    assert_eq!(response.answer, "first");
}

#[tokio::test]
async fn cancelled_waiter_hands_the_slot_back() {
    let registry = Arc::new(InterruptRegistry::new(config(10, 10)));
    registry
        .register(request("cp-1", "chat:a"))
        .await
        .expect("register");

    let cancel = CancellationToken::new();
    let waiter = {
        let registry = Arc::clone(&registry);
        let cancel = cancel.clone();
        tokio::spawn(async move { registry.await_response("cp-1", &cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let err = registry
        .await_response("cp-1", &CancellationToken::new())
        .await
        .expect_err("slot taken");
    assert!(matches!(err, AppError::AlreadyConsumed(_)));

    cancel.cancel();
    let err = waiter.await.expect("join").expect_err("cancelled");
    assert!(matches!(err, AppError::Cancelled(_)));
    assert_eq!(registry.pending_count().await, 1);

    registry
        .submit_response(UserResponse::new("cp-1", "late but fine"))
        .await
        .expect("submit");
    let response = registry
        .await_response("cp-1", &CancellationToken::new())
        .await
        .expect("await");
    assert_eq!(response.answer, "late but fine");
}

#[tokio::test]
async fn take_response_leaves_request_live_and_rearmed() {
    let registry = InterruptRegistry::new(config(10, 10));
    registry
        .register(request("cp-1", "chat:a"))
        .await
        .expect("register");

    registry
        .submit_response(UserResponse::new("cp-1", "staging"))
        .await
        .expect("submit");
    let response = registry
        .take_response("cp-1", &CancellationToken::new())
        .await
        .expect("take");
    assert_eq!(response.answer, "staging");
    assert!(registry.get_pending("chat:a").await.is_some());

    registry
        .submit_response(UserResponse::new("cp-1", "production"))
        .await
        .expect("second answer after retry");
    let response = registry
        .take_response("cp-1", &CancellationToken::new())
        .await
        .expect("take again");
    assert_eq!(response.answer, "production");

    let cleared = registry.clear("cp-1").await.expect("clear");
    assert_eq!(cleared.status, InterruptStatus::Resolved);
    assert!(registry.get_pending("chat:a").await.is_none());
}

#[tokio::test]
async fn answer_backlog_is_one_slot_per_live_request() {
    let registry = InterruptRegistry::new(config(1, 10));
    for (checkpoint_id, session) in [("cp-1", "chat:a"), ("cp-2", "chat:b")] {
        registry
            .register(request(checkpoint_id, session))
            .await
            .expect("register");
    }
    assert_eq!(registry.pending_count().await, 2);

    for checkpoint_id in ["cp-1", "cp-2"] {
        registry
            .submit_response(UserResponse::new(checkpoint_id, "yes"))
            .await
            .expect("each live request takes one answer");
        let err = registry
            .submit_response(UserResponse::new(checkpoint_id, "again"))
            .await
            .expect_err("slot full");
        assert!(matches!(err, AppError::Backpressure(_)));
    }
}

#[tokio::test]
async fn validation_failure_keeps_request_live() {
    let registry = InterruptRegistry::new(config(10, 10));
    registry
        .register(request("cp-1", "chat:a").with_kind(InterruptKind::ToolConfirm))
        .await
        .expect("register");

    let err = registry
        .submit_response(UserResponse::new("cp-1", "hmm"))
        .await
        .expect_err("no decision");
    assert!(matches!(err, AppError::ValidationFailed(_)));
    assert!(registry.get_pending("chat:a").await.is_some());

    registry
        .submit_response(UserResponse::new("cp-1", "yes"))
        .await
        .expect("decision");
}

#[tokio::test]
async fn capacity_sweep_evicts_only_expired_entries() {
    let registry = InterruptRegistry::new(config(2, 10));
    registry
        .register(request("cp-old", "chat:a").with_expires_at(Utc::now() - chrono::Duration::seconds(5)))
        .await
        .expect("register expired");
    registry
        .register(request("cp-live", "chat:b"))
        .await
        .expect("register live");

    registry
        .register(request("cp-new", "chat:c"))
        .await
        .expect("register over capacity");
    assert_eq!(registry.pending_count().await, 2);
    assert!(registry.find("cp-old").await.is_none());
    assert!(registry.find("cp-live").await.is_some());

    // No expired entries left: live ones are kept even over capacity.
    registry
        .register(request("cp-extra", "chat:d"))
        .await
        .expect("register with no expired entries");
    assert_eq!(registry.pending_count().await, 3);
}

#[tokio::test]
async fn same_turn_supersedes_and_other_turn_conflicts() {
    let registry = InterruptRegistry::new(config(10, 10));
    registry
        .register(request("cp-1", "chat:a"))
        .await
        .expect("register");

    registry
        .register(request("cp-1-r1", "chat:a").with_original_checkpoint("cp-1"))
        .await
        .expect("same turn");
    let pending = registry.get_pending("chat:a").await.expect("pending");
    assert_eq!(pending.checkpoint_id, "cp-1-r1");
    assert_eq!(registry.pending_count().await, 1);
    assert_eq!(registry.history(None).await[0].status, InterruptStatus::Resolved);

    let err = registry
        .register(request("cp-9", "chat:a"))
        .await
        .expect_err("different turn");
    assert!(matches!(err, AppError::Conflict(_)));

    let err = registry
        .register(request("cp-1-r1", "chat:z"))
        .await
        .expect_err("duplicate checkpoint");
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn find_matches_original_checkpoint() {
    let registry = InterruptRegistry::new(config(10, 10));
    registry
        .register(request("cp-2", "chat:a").with_original_checkpoint("cp-1"))
        .await
        .expect("register");
    assert_eq!(
        registry.find("cp-1").await.expect("by original").checkpoint_id,
        "cp-2"
    );
}

struct ShoutHandler;

impl InterruptHandler for ShoutHandler {
    fn format_question(&self, request: &InterruptRequest) -> String {
        request.question.to_uppercase()
    }

    fn validate(&self, _request: &InterruptRequest, response: &UserResponse) -> Result<()> {
        if response.answer.chars().all(|c| !c.is_lowercase()) {
            Ok(())
        } else {
            Err(AppError::ValidationFailed("answer must be shouted".into()))
        }
    }

    fn handle(&self, _request: &InterruptRequest, response: &UserResponse) -> serde_json::Value {
        serde_json::json!({ "shouted": response.answer })
    }
}

#[tokio::test]
async fn custom_handler_formats_validates_and_builds_payload() {
    let outbox = Arc::new(Outbox::default());
    let registry = InterruptRegistry::new(config(10, 10)).with_sink(outbox.clone());
    let kind = InterruptKind::Custom("shout".into());
    registry.register_handler(kind.clone(), Arc::new(ShoutHandler)).await;

    let registered = registry
        .register(request("cp-1", "chat:a").with_kind(kind))
        .await
        .expect("register");
    assert_eq!(outbox.sent.lock().expect("outbox")[0], "DEPLOY NOW?");

    let err = registry
        .submit_response(UserResponse::new("cp-1", "quiet"))
        .await
        .expect_err("lowercase");
    assert!(matches!(err, AppError::ValidationFailed(_)));

    let response = UserResponse::new("cp-1", "LOUD");
    registry
        .submit_response(response.clone())
        .await
        .expect("submit");
    assert_eq!(
        registry.resume_payload(&registered, &response).await,
        serde_json::json!({ "shouted": "LOUD" })
    );
}

#[tokio::test]
async fn unhandled_kind_uses_generic_formatting() {
    let outbox = Arc::new(Outbox::default());
    let registry = InterruptRegistry::new(config(10, 10)).with_sink(outbox.clone());
    let registered = registry
        .register(
            request("cp-1", "chat:a")
                .with_kind(InterruptKind::Custom("unknown".into()))
                .with_options(vec!["a".into(), "b".into()]),
        )
        .await
        .expect("register");
    assert_eq!(
        outbox.sent.lock().expect("outbox")[0],
        "Deploy now?\n\nOptions: [\"a\",\"b\"]"
    );
    assert_eq!(
        registry
            .resume_payload(&registered, &UserResponse::new("cp-1", "b"))
            .await,
        serde_json::json!({ "user_answer": "b" })
    );
}

#[tokio::test]
async fn sweep_reclaims_expired_entries() {
    let registry = InterruptRegistry::new(config(10, 10));
    registry
        .register(request("cp-1", "chat:a").with_expires_at(Utc::now() - chrono::Duration::seconds(1)))
        .await
        .expect("register");
    registry
        .register(request("cp-2", "chat:b"))
        .await
        .expect("register");
    assert!(registry.get_pending("chat:a").await.is_none());
    assert_eq!(registry.sweep_expired().await, 1);
    assert_eq!(registry.pending_count().await, 1);
}
