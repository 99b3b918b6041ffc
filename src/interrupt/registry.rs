//! Interrupt registry: who the runtime is waiting on, and why.
//!
//! Every live suspension is held in a [`PendingIndex`] keyed by checkpoint
//! id (with a derived per-session index) and owns a single-use response
//! slot handed out at registration. A copy of each request also goes into
//! a bounded history ring for audit. Lock scopes cover map mutation only;
//! question formatting and delivery happen after the locks are released.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::handlers::{builtin_handlers, format_generic, generic_payload, InterruptHandler};
use super::history::{HistoryRing, InterruptStats};
use super::index::PendingIndex;
use crate::audit::{self, AuditEntry, AuditEventType, AuditLogger};
use crate::config::InterruptConfig;
use crate::driver::MessageSink;
use crate::models::interrupt::{
    Destination, InterruptKind, InterruptRequest, InterruptStatus, UserResponse,
};
use crate::{AppError, Result};

/// Tracks every in-flight "awaiting human" suspension.
pub struct InterruptRegistry {
    config: InterruptConfig,
    pending: RwLock<PendingIndex>,
    history: Mutex<HistoryRing>,
    handlers: RwLock<HashMap<InterruptKind, Arc<dyn InterruptHandler>>>,
    sink: Option<Arc<dyn MessageSink>>,
    audit: Option<Arc<dyn AuditLogger>>,
}

impl InterruptRegistry {
    /// Create a registry with the built-in handlers and no outbound sink.
    #[must_use]
    pub fn new(config: InterruptConfig) -> Self {
        let history = HistoryRing::new(config.history_capacity);
        Self {
            config,
            pending: RwLock::new(PendingIndex::default()),
            history: Mutex::new(history),
            handlers: RwLock::new(builtin_handlers()),
            sink: None,
            audit: None,
        }
    }

    /// Deliver formatted questions through `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn MessageSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Record lifecycle events through `audit`.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Install a handler for `kind`, replacing any earlier one.
    pub async fn register_handler(&self, kind: InterruptKind, handler: Arc<dyn InterruptHandler>) {
        debug!(%kind, "interrupt handler registered");
        self.handlers.write().await.insert(kind, handler);
    }

    /// Register a new suspension and deliver its question.
    ///
    /// Fills `status`, `created_at`, a default `expires_at`, and missing
    /// identifiers. When the live count is at capacity, expired entries are
    /// swept first; live entries are never evicted. A live request for the
    /// same session is superseded when it belongs to the same turn (same
    /// original checkpoint) and expired ones are reclaimed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ValidationFailed` for an empty checkpoint id and
    /// `AppError::Conflict` if the checkpoint is already pending or the
    /// session is awaiting an answer for a different turn.
    pub async fn register(&self, mut request: InterruptRequest) -> Result<InterruptRequest> {
        if request.checkpoint_id.is_empty() {
            return Err(AppError::ValidationFailed(
                "checkpoint id must not be empty".into(),
            ));
        }

        let now = Utc::now();
        request.status = InterruptStatus::Pending;
        request.created_at = now;
        if request.expires_at.is_none() {
            request.expires_at = chrono::Duration::from_std(self.config.default_timeout())
                .ok()
                .map(|timeout| now + timeout);
        }
        if request.original_checkpoint_id.is_empty() {
            request.original_checkpoint_id.clone_from(&request.checkpoint_id);
        }
        if request.interrupt_id.is_empty() {
            request.interrupt_id = Uuid::new_v4().to_string();
        }

        let span = info_span!(
            "register_interrupt",
            checkpoint_id = %request.checkpoint_id,
            session_key = %request.session_key,
            kind = %request.kind,
        );

        async move {
            let mut retired = Vec::new();
            {
                let mut pending = self.pending.write().await;
                if pending.contains(&request.checkpoint_id) {
                    return Err(AppError::Conflict(format!(
                        "checkpoint {} is already pending",
                        request.checkpoint_id
                    )));
                }

                let existing = pending
                    .for_session(&request.session_key)
                    .map(|entry| entry.request.clone());
                if let Some(existing) = existing {
                    if existing.is_expired_at(now) {
                        pending.remove(&existing.checkpoint_id);
                        retired.push((existing, InterruptStatus::Expired));
                    } else if existing.original_checkpoint_id == request.original_checkpoint_id {
                        pending.remove(&existing.checkpoint_id);
                        retired.push((existing, InterruptStatus::Resolved));
                    } else {
                        return Err(AppError::Conflict(format!(
                            "session {} is already awaiting an answer for checkpoint {}",
                            request.session_key, existing.checkpoint_id
                        )));
                    }
                }

                if pending.len() >= self.config.max_pending {
                    for checkpoint_id in pending.expired_ids(now) {
                        if let Some(entry) = pending.remove(&checkpoint_id) {
                            retired.push((entry.request, InterruptStatus::Expired));
                        }
                    }
                    if pending.len() >= self.config.max_pending {
                        warn!(
                            live = pending.len(),
                            max_pending = self.config.max_pending,
                            "interrupt registry over capacity with no expired entries"
                        );
                    }
                }

                pending.insert(request.clone());
            }

            {
                let mut history = self.history.lock().await;
                for (old, status) in &retired {
                    history.set_status(&old.checkpoint_id, *status);
                }
                history.push(request.clone());
            }

            for (old, status) in retired {
                info!(checkpoint_id = %old.checkpoint_id, %status, "interrupt retired by newer registration");
                self.record(&old, status);
            }
            audit::record(
                self.audit.as_deref(),
                AuditEntry::new(AuditEventType::InterruptRegistered)
                    .with_session(request.session_key.clone())
                    .with_checkpoint(request.checkpoint_id.clone())
                    .with_status(InterruptStatus::Pending.to_string())
                    .with_detail(request.question.clone()),
            );

            let text = self.format_question(&request).await;
            self.deliver(request.destination.clone(), text).await;

            info!(interrupt_id = %request.interrupt_id, "interrupt registered");
            Ok(request)
        }
        .instrument(span)
        .await
    }

    /// Validate and queue a human answer for its checkpoint.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if no live request has this checkpoint id.
    /// - `AppError::Expired` if the request passed its expiry; the entry is
    ///   removed from the registry.
    /// - `AppError::ValidationFailed` if the kind's handler rejects the answer.
    /// - `AppError::Backpressure` if an earlier answer has not been consumed.
    pub async fn submit_response(&self, mut response: UserResponse) -> Result<()> {
        let checkpoint_id = response.checkpoint_id.clone();
        let request = {
            let pending = self.pending.read().await;
            pending
                .get(&checkpoint_id)
                .map(|entry| entry.request.clone())
        }
        .ok_or_else(|| {
            AppError::NotFound(format!("no pending interrupt for checkpoint {checkpoint_id}"))
        })?;

        if request.is_expired() {
            self.retire(&checkpoint_id, InterruptStatus::Expired).await;
            return Err(AppError::Expired(format!(
                "interrupt for checkpoint {checkpoint_id} has expired"
            )));
        }

        if let Some(handler) = self.handler_for(&request.kind).await {
            handler.validate(&request, &response)?;
        }

        response.submitted_at = Utc::now();

        let mut pending = self.pending.write().await;
        let entry = pending.get_mut(&checkpoint_id).ok_or_else(|| {
            AppError::NotFound(format!("no pending interrupt for checkpoint {checkpoint_id}"))
        })?;
        let tx = entry.response_tx.take().ok_or_else(|| {
            AppError::Backpressure(format!(
                "an answer for checkpoint {checkpoint_id} is already queued"
            ))
        })?;
        if let Err(response) = tx.send(response) {
            // The previous waiter went away with the receiver; rebuild the slot.
            let (tx, rx) = oneshot::channel();
            let _ = tx.send(response);
            entry.response_rx = Some(rx);
        }

        info!(checkpoint_id, "interrupt response accepted");
        Ok(())
    }

    /// Wait for the answer to `checkpoint_id`, then resolve the request.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if the checkpoint is unknown or was withdrawn
    ///   while waiting.
    /// - `AppError::AlreadyConsumed` if another waiter holds the slot.
    /// - `AppError::Cancelled` if `cancel` fires first; the slot is handed
    ///   back so a later waiter can still receive the answer.
    pub async fn await_response(
        &self,
        checkpoint_id: &str,
        cancel: &CancellationToken,
    ) -> Result<UserResponse> {
        let response = self.take_response(checkpoint_id, cancel).await?;
        self.retire(checkpoint_id, InterruptStatus::Resolved).await;
        Ok(response)
    }

    /// Wait for the answer to `checkpoint_id` but leave the request live.
    ///
    /// The slot is re-armed once the answer is taken, so the human can
    /// answer again if the turn fails to continue. The caller retires the
    /// request with [`clear`](Self::clear) once the turn completes.
    ///
    /// # Errors
    ///
    /// Same as [`await_response`](Self::await_response).
    pub async fn take_response(
        &self,
        checkpoint_id: &str,
        cancel: &CancellationToken,
    ) -> Result<UserResponse> {
        let mut rx = {
            let mut pending = self.pending.write().await;
            let entry = pending.get_mut(checkpoint_id).ok_or_else(|| {
                AppError::NotFound(format!("no pending interrupt for checkpoint {checkpoint_id}"))
            })?;
            entry.response_rx.take().ok_or_else(|| {
                AppError::AlreadyConsumed(format!(
                    "checkpoint {checkpoint_id} already has a waiter"
                ))
            })?
        };

        let outcome = tokio::select! {
            biased;
            result = &mut rx => Some(result),
            () = cancel.cancelled() => None,
        };

        match outcome {
            Some(Ok(response)) => {
                if let Some(entry) = self.pending.write().await.get_mut(checkpoint_id) {
                    entry.rearm();
                }
                debug!(checkpoint_id, "interrupt response taken");
                Ok(response)
            }
            Some(Err(_)) => Err(AppError::NotFound(format!(
                "interrupt for checkpoint {checkpoint_id} was withdrawn"
            ))),
            None => {
                if let Some(entry) = self.pending.write().await.get_mut(checkpoint_id) {
                    entry.response_rx = Some(rx);
                }
                Err(AppError::Cancelled(format!(
                    "stopped waiting for checkpoint {checkpoint_id}"
                )))
            }
        }
    }

    /// Withdraw a live request, recording it as cancelled.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the checkpoint is not live.
    pub async fn cancel(&self, checkpoint_id: &str) -> Result<InterruptRequest> {
        self.retire(checkpoint_id, InterruptStatus::Cancelled)
            .await
            .ok_or_else(|| {
                AppError::NotFound(format!("no pending interrupt for checkpoint {checkpoint_id}"))
            })
    }

    /// Remove a live request after its turn completed.
    pub async fn clear(&self, checkpoint_id: &str) -> Option<InterruptRequest> {
        self.retire(checkpoint_id, InterruptStatus::Resolved).await
    }

    /// Reclaim every expired entry; returns how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<String> = self.pending.read().await.expired_ids(now);
        let mut removed = 0;
        for checkpoint_id in expired {
            if self
                .retire(&checkpoint_id, InterruptStatus::Expired)
                .await
                .is_some()
            {
                removed += 1;
            }
        }
        removed
    }

    /// The unexpired live request for a session, if any.
    pub async fn get_pending(&self, session_key: &str) -> Option<InterruptRequest> {
        let pending = self.pending.read().await;
        pending
            .for_session(session_key)
            .filter(|entry| !entry.request.is_expired())
            .map(|entry| entry.request.clone())
    }

    /// The unexpired live request whose active or original checkpoint is `id`.
    pub async fn find(&self, id: &str) -> Option<InterruptRequest> {
        let pending = self.pending.read().await;
        pending
            .find(id)
            .filter(|entry| !entry.request.is_expired())
            .map(|entry| entry.request.clone())
    }

    /// Number of live requests, expired or not.
    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }

    /// Oldest-first copy of the newest `limit` history entries.
    pub async fn history(&self, limit: Option<usize>) -> Vec<InterruptRequest> {
        self.history.lock().await.snapshot(limit)
    }

    /// Counts by kind and status over the history, plus the live total.
    pub async fn stats(&self) -> InterruptStats {
        let pending = self.pending_count().await;
        self.history.lock().await.stats(pending)
    }

    /// Resume payload for a generic-shaped interrupt, built by its handler.
    pub async fn resume_payload(
        &self,
        request: &InterruptRequest,
        response: &UserResponse,
    ) -> serde_json::Value {
        match self.handler_for(&request.kind).await {
            Some(handler) => handler.handle(request, response),
            None => generic_payload(response),
        }
    }

    /// Render the question for a request with its kind's handler.
    pub async fn format_question(&self, request: &InterruptRequest) -> String {
        match self.handler_for(&request.kind).await {
            Some(handler) => handler.format_question(request),
            None => format_generic(request),
        }
    }

    async fn handler_for(&self, kind: &InterruptKind) -> Option<Arc<dyn InterruptHandler>> {
        self.handlers.read().await.get(kind).cloned()
    }

    async fn retire(&self, checkpoint_id: &str, status: InterruptStatus) -> Option<InterruptRequest> {
        let mut request = self.pending.write().await.remove(checkpoint_id)?.request;
        request.status = status;
        self.history.lock().await.set_status(checkpoint_id, status);
        info!(checkpoint_id, %status, "interrupt retired");
        self.record(&request, status);
        Some(request)
    }

    fn record(&self, request: &InterruptRequest, status: InterruptStatus) {
        let event_type = match status {
            InterruptStatus::Pending => AuditEventType::InterruptRegistered,
            InterruptStatus::Resolved => AuditEventType::InterruptResolved,
            InterruptStatus::Cancelled => AuditEventType::InterruptCancelled,
            InterruptStatus::Expired => AuditEventType::InterruptExpired,
        };
        audit::record(
            self.audit.as_deref(),
            AuditEntry::new(event_type)
                .with_session(request.session_key.clone())
                .with_checkpoint(request.checkpoint_id.clone())
                .with_status(status.to_string()),
        );
    }

    async fn deliver(&self, destination: Destination, text: String) {
        let Some(sink) = self.sink.as_ref() else {
            warn!("no message sink configured; question will not be delivered");
            return;
        };
        if destination.channel.is_empty() {
            debug!("interrupt has no destination; skipping delivery");
            return;
        }
        if let Err(err) = sink.publish(destination, text).await {
            warn!(%err, "failed to deliver interrupt question");
        }
    }
}
