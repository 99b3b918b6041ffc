//! Interfaces to the external collaborators that do the real work.
//!
//! The [`TurnExecutor`] runs (and resumes) LLM-driven turns, the
//! [`MessageSink`] delivers text to a channel/chat, and the [`SessionStore`]
//! keeps per-session conversation history. The orchestration core only
//! talks to these traits, so transports and model providers plug in
//! without touching the suspend/resume machinery.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use futures_util::Stream;
use serde::{Deserialize, Serialize};

use crate::models::interrupt::{AnswerShape, Destination, InterruptKind};
use crate::models::turn::ChatMessage;
use crate::Result;

/// Boxed, sendable future returned by collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Stream of events produced by one executor run or resume.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<TurnEvent>> + Send>>;

/// Events emitted by a turn executor while it works.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// A message produced during the turn; assistant messages are replies.
    Message(ChatMessage),
    /// The turn paused and needs answers for these interrupts.
    Suspended {
        /// Pending interrupts, in executor order. Only the first one is
        /// surfaced to the human.
        interrupts: Vec<InterruptPayload>,
    },
}

/// One named interrupt carried by a suspension event.
#[derive(Debug, Clone, PartialEq)]
pub struct InterruptPayload {
    /// Interrupt identifier; answers are keyed by it on resume.
    pub id: String,
    /// Payload describing what is being asked.
    pub value: InterruptValue,
}

/// Interrupt payload in either the typed ask-user shape or a loose map.
#[derive(Debug, Clone, PartialEq)]
pub enum InterruptValue {
    /// Typed ask-user question.
    AskUser(AskUserPrompt),
    /// Free-form key/value payload (`question`, `options`, `kind`, ...).
    Generic(serde_json::Map<String, serde_json::Value>),
}

/// Typed ask-user question payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AskUserPrompt {
    /// Question text.
    pub question: String,
    /// Suggested answers.
    #[serde(default)]
    pub options: Vec<String>,
    /// Interrupt kind, when the executor wants a specific handler.
    #[serde(default)]
    pub kind: Option<InterruptKind>,
}

impl InterruptValue {
    /// Question text carried by the payload.
    #[must_use]
    pub fn question(&self) -> String {
        match self {
            Self::AskUser(prompt) => prompt.question.clone(),
            Self::Generic(map) => ["question", "prompt", "message"]
                .iter()
                .find_map(|key| map.get(*key).and_then(serde_json::Value::as_str))
                .unwrap_or_default()
                .to_owned(),
        }
    }

    /// Suggested answers carried by the payload.
    #[must_use]
    pub fn options(&self) -> Vec<String> {
        match self {
            Self::AskUser(prompt) => prompt.options.clone(),
            Self::Generic(map) => map
                .get("options")
                .and_then(serde_json::Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .map(|item| match item {
                            serde_json::Value::String(text) => text.clone(),
                            other => other.to_string(),
                        })
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    /// Interrupt kind requested by the payload; ask-user when unspecified.
    #[must_use]
    pub fn kind(&self) -> InterruptKind {
        let requested = match self {
            Self::AskUser(prompt) => prompt.kind.clone(),
            Self::Generic(map) => map
                .get("kind")
                .cloned()
                .and_then(|value| serde_json::from_value(value).ok()),
        };
        requested.unwrap_or(InterruptKind::AskUser)
    }

    /// Resume payload shape the executor expects for this interrupt.
    #[must_use]
    pub fn answer_shape(&self) -> AnswerShape {
        match self {
            Self::AskUser(_) => AnswerShape::AskUser,
            Self::Generic(_) => AnswerShape::Generic,
        }
    }
}

/// Answer handed back to the executor for one interrupt.
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeValue {
    /// Typed ask-user answer.
    AskUser(AskUserAnswer),
    /// Generic map, at minimum `{"user_answer": ...}`.
    Generic(serde_json::Value),
}

/// Typed ask-user answer payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AskUserAnswer {
    /// Answer text.
    pub answer: String,
    /// Explicit decision for approval-style questions.
    #[serde(default)]
    pub approved: Option<bool>,
    /// Structured edits supplied with the answer.
    #[serde(default)]
    pub modifications: Option<serde_json::Value>,
}

/// Everything the executor needs to start a fresh turn.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    /// Checkpoint the executor persists continuation state under.
    pub checkpoint_id: String,
    /// Prompt: session history followed by the new input.
    pub messages: Vec<ChatMessage>,
    /// Step budget for the turn.
    pub max_steps: u32,
    /// Whether the executor may suspend to ask the human.
    pub allow_user_questions: bool,
}

/// LLM-driven turn executor.
pub trait TurnExecutor: Send + Sync {
    /// Start a fresh turn.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Runtime`](crate::AppError::Runtime) if the turn
    /// cannot be started.
    fn run(&self, request: RunRequest) -> BoxFuture<'_, EventStream>;

    /// Continue a suspended turn with answers keyed by interrupt id.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Runtime`](crate::AppError::Runtime) if the
    /// checkpoint cannot be restored or the turn fails to continue.
    fn resume(
        &self,
        checkpoint_id: String,
        answers: HashMap<String, ResumeValue>,
    ) -> BoxFuture<'_, EventStream>;
}

/// Outbound messaging sink.
pub trait MessageSink: Send + Sync {
    /// Deliver `text` to `destination`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Delivery`](crate::AppError::Delivery) if the
    /// message cannot be handed to the channel.
    fn publish(&self, destination: Destination, text: String) -> BoxFuture<'_, ()>;
}

/// Per-session conversation history.
pub trait SessionStore: Send + Sync {
    /// Full history for a session, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    fn history(&self, session_key: String) -> BoxFuture<'_, Vec<ChatMessage>>;

    /// Append one message to a session.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be written.
    fn append(&self, session_key: String, message: ChatMessage) -> BoxFuture<'_, ()>;

    /// Drop all but the last `keep` messages; returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be written.
    fn truncate(&self, session_key: String, keep: usize) -> BoxFuture<'_, usize>;
}
