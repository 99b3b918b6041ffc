//! Resumable execution flow.
//!
//! Drives one conversational turn to completion or suspension, and drives
//! the resumption of a suspended turn. A turn moves
//! `Fresh -> Running -> {Completed | Suspended}`; a suspended turn goes back
//! to `Running` on resume and may suspend again any number of times. The
//! original checkpoint id is carried through every hop while the active
//! checkpoint id changes at each suspension, so a multi-hop clarification
//! still reads as one question to the human.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use super::hooks::{self, CompletedTurn, HistoryCompaction, PostTurnHook};
use crate::config::FlowConfig;
use crate::driver::{
    AskUserAnswer, EventStream, InterruptPayload, InterruptValue, ResumeValue, RunRequest,
    SessionStore, TurnEvent, TurnExecutor,
};
use crate::interrupt::InterruptRegistry;
use crate::models::interrupt::{AnswerShape, Destination, InterruptRequest, UserResponse};
use crate::models::turn::{ChatMessage, InboundMessage, Role, TurnOutcome};
use crate::{AppError, Result};

/// What an executor stream produced before it ended.
#[derive(Debug, Default)]
pub(crate) struct Drained {
    /// Latest assistant reply.
    pub(crate) reply: String,
    /// Last event seen.
    pub(crate) last: Option<TurnEvent>,
    /// Error that ended the stream early, if any.
    pub(crate) error: Option<AppError>,
}

impl Drained {
    /// Interrupts carried by the last event, when the turn suspended.
    pub(crate) fn suspension(&self) -> Option<&[InterruptPayload]> {
        match &self.last {
            Some(TurnEvent::Suspended { interrupts }) => Some(interrupts),
            _ => None,
        }
    }
}

/// Consume an executor stream, keeping the latest reply and the last event.
///
/// # Errors
///
/// Returns `AppError::Cancelled` if `cancel` fires before the stream ends.
/// Executor errors are reported in [`Drained::error`] so callers can decide
/// whether a preceding suspension still stands.
pub(crate) async fn drain(mut stream: EventStream, cancel: &CancellationToken) -> Result<Drained> {
    let mut drained = Drained::default();
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(AppError::Cancelled("turn cancelled".into()));
            }
            item = stream.next() => item,
        };
        match next {
            None => break,
            Some(Err(err)) => {
                drained.error = Some(err);
                break;
            }
            Some(Ok(event)) => {
                if let TurnEvent::Message(message) = &event {
                    if message.role == Role::Assistant {
                        drained.reply.clone_from(&message.content);
                    }
                }
                drained.last = Some(event);
            }
        }
    }
    Ok(drained)
}

/// Makes a conversational turn look atomic to its caller.
pub struct ResumableFlow {
    registry: Arc<InterruptRegistry>,
    executor: Arc<dyn TurnExecutor>,
    sessions: Arc<dyn SessionStore>,
    hooks: Vec<Arc<dyn PostTurnHook>>,
    config: FlowConfig,
    last_stamp: AtomicI64,
}

impl ResumableFlow {
    /// Create a flow. A history compaction hook is installed when
    /// `config.compact_keep_messages` is non-zero.
    #[must_use]
    pub fn new(
        registry: Arc<InterruptRegistry>,
        executor: Arc<dyn TurnExecutor>,
        sessions: Arc<dyn SessionStore>,
        config: FlowConfig,
    ) -> Self {
        let mut hooks: Vec<Arc<dyn PostTurnHook>> = Vec::new();
        if config.compact_keep_messages > 0 {
            hooks.push(Arc::new(HistoryCompaction::new(
                Arc::clone(&sessions),
                config.compact_keep_messages,
            )));
        }
        Self {
            registry,
            executor,
            sessions,
            hooks,
            config,
            last_stamp: AtomicI64::new(0),
        }
    }

    /// Append a post-turn hook; hooks run in insertion order.
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn PostTurnHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Handle one inbound message.
    ///
    /// If the session is waiting on a human answer, the message is that
    /// answer and the suspended turn is resumed. Otherwise a fresh turn
    /// runs against the executor.
    ///
    /// # Errors
    ///
    /// Returns executor failures as-is, `AppError::Cancelled` if `cancel`
    /// fires, or any registry error raised while registering a suspension
    /// or submitting an answer.
    pub async fn process(
        &self,
        message: &InboundMessage,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        let session_key = message.session_key();

        if let Some(pending) = self.registry.get_pending(&session_key).await {
            info!(
                session_key,
                checkpoint_id = %pending.checkpoint_id,
                original_checkpoint_id = %pending.original_checkpoint_id,
                "message answers a pending interrupt"
            );
            return self
                .resume(&pending.original_checkpoint_id, &message.content, cancel)
                .await;
        }

        let checkpoint_id = format!("{session_key}:{}", self.next_stamp());
        let span = info_span!("process_turn", %session_key, %checkpoint_id);

        async move {
            let mut messages = self.sessions.history(session_key.clone()).await?;
            let user_message = ChatMessage::user(message.content.clone());
            messages.push(user_message.clone());

            let stream = self
                .executor
                .run(RunRequest {
                    checkpoint_id: checkpoint_id.clone(),
                    messages,
                    max_steps: self.config.max_steps,
                    allow_user_questions: true,
                })
                .await?;
            let mut drained = drain(stream, cancel).await?;
            if let Some(err) = drained.error.take() {
                return Err(err);
            }

            if let Some(interrupts) = drained.suspension() {
                let request = self.build_request(
                    interrupts,
                    &checkpoint_id,
                    &checkpoint_id,
                    &session_key,
                    &message.destination,
                )?;
                let outcome = self.suspend(request).await?;
                self.record_user_message(&session_key, user_message).await;
                return Ok(outcome);
            }

            self.complete(&session_key, &checkpoint_id, user_message, &drained.reply)
                .await;
            Ok(TurnOutcome::Completed(drained.reply))
        }
        .instrument(span)
        .await
    }

    /// Answer a suspended turn and continue it.
    ///
    /// `checkpoint_id` may be the active or the original checkpoint. The
    /// interrupt stays live until the turn completes or suspends again, so
    /// a failed or cancelled resume can be retried with a new answer.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if nothing is pending for the checkpoint.
    /// - Registry errors from submitting the answer (`Expired`,
    ///   `ValidationFailed`, `Backpressure`).
    /// - Executor failures that are not a new suspension.
    pub async fn resume(
        &self,
        checkpoint_id: &str,
        answer: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        let request = self.registry.find(checkpoint_id).await.ok_or_else(|| {
            AppError::NotFound(format!("no pending interrupt for checkpoint {checkpoint_id}"))
        })?;

        let span = info_span!(
            "resume_turn",
            session_key = %request.session_key,
            checkpoint_id = %request.checkpoint_id,
            original_checkpoint_id = %request.original_checkpoint_id,
        );

        async move {
            self.registry
                .submit_response(UserResponse::new(request.checkpoint_id.clone(), answer))
                .await?;
            let response = self
                .registry
                .take_response(&request.checkpoint_id, cancel)
                .await?;

            let value = match request.answer_shape {
                AnswerShape::AskUser => ResumeValue::AskUser(AskUserAnswer {
                    answer: response.answer.clone(),
                    approved: response.approved,
                    modifications: response.modifications.clone(),
                }),
                AnswerShape::Generic => {
                    ResumeValue::Generic(self.registry.resume_payload(&request, &response).await)
                }
            };
            let answers = HashMap::from([(request.interrupt_id.clone(), value)]);

            let stream = self
                .executor
                .resume(request.checkpoint_id.clone(), answers)
                .await?;
            let drained = drain(stream, cancel).await?;

            if let Some(interrupts) = drained.suspension() {
                if let Some(err) = &drained.error {
                    warn!(%err, "executor failed after suspending again; keeping the suspension");
                }
                let next_id = format!("{}-r{}", request.checkpoint_id, self.next_stamp());
                let next = self.build_request(
                    interrupts,
                    &next_id,
                    &request.original_checkpoint_id,
                    &request.session_key,
                    &request.destination,
                )?;
                let outcome = self.suspend(next).await?;
                // Sessionless requests are not superseded by the registry.
                self.registry.clear(&request.checkpoint_id).await;
                self.record_user_message(&request.session_key, ChatMessage::user(answer))
                    .await;
                return Ok(outcome);
            }
            if let Some(err) = drained.error {
                return Err(err);
            }

            self.registry.clear(&request.checkpoint_id).await;
            self.complete(
                &request.session_key,
                &request.original_checkpoint_id,
                ChatMessage::user(answer),
                &drained.reply,
            )
            .await;
            Ok(TurnOutcome::Completed(drained.reply))
        }
        .instrument(span)
        .await
    }

    async fn suspend(&self, request: InterruptRequest) -> Result<TurnOutcome> {
        let request = self.registry.register(request).await?;
        info!(
            checkpoint_id = %request.checkpoint_id,
            interrupt_id = %request.interrupt_id,
            "turn suspended awaiting a human answer"
        );
        Ok(TurnOutcome::Suspended {
            checkpoint_id: request.checkpoint_id,
            interrupt_id: request.interrupt_id,
        })
    }

    fn build_request(
        &self,
        interrupts: &[InterruptPayload],
        checkpoint_id: &str,
        original_checkpoint_id: &str,
        session_key: &str,
        destination: &Destination,
    ) -> Result<InterruptRequest> {
        let first = interrupts.first().ok_or_else(|| {
            AppError::Runtime("executor suspended without any interrupt payload".into())
        })?;
        if interrupts.len() > 1 {
            warn!(
                count = interrupts.len(),
                interrupt_id = %first.id,
                "suspension carried several interrupts; surfacing the first"
            );
        }

        let mut request = InterruptRequest::new(checkpoint_id, session_key, first.value.question())
            .with_interrupt_id(first.id.clone())
            .with_original_checkpoint(original_checkpoint_id)
            .with_destination(destination.clone())
            .with_options(first.value.options())
            .with_kind(first.value.kind());
        request.origin = self.config.origin;
        request.answer_shape = first.value.answer_shape();
        if let InterruptValue::Generic(map) = &first.value {
            request.metadata = map.clone();
        }
        Ok(request)
    }

    async fn complete(
        &self,
        session_key: &str,
        checkpoint_id: &str,
        user_message: ChatMessage,
        reply: &str,
    ) {
        self.record_user_message(session_key, user_message).await;
        let turn = CompletedTurn {
            session_key: session_key.to_owned(),
            checkpoint_id: checkpoint_id.to_owned(),
            reply: reply.to_owned(),
        };
        hooks::run_all(&self.hooks, &turn).await;
        info!(session_key, checkpoint_id, "turn completed");
    }

    async fn record_user_message(&self, session_key: &str, message: ChatMessage) {
        if let Err(err) = self.sessions.append(session_key.to_owned(), message).await {
            warn!(session_key, %err, "failed to record user message");
        }
    }

    /// Strictly increasing nanosecond stamp for checkpoint ids.
    fn next_stamp(&self) -> i64 {
        let now = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let mut previous = self.last_stamp.load(Ordering::Relaxed);
        loop {
            let next = now.max(previous + 1);
            match self.last_stamp.compare_exchange_weak(
                previous,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => previous = actual,
            }
        }
    }
}
