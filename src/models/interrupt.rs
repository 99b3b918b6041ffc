//! Interrupt request and user response models.

use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Classification of an interrupt; selects the handler used to format the
/// question and validate the answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum InterruptKind {
    /// Free-form clarification question.
    AskUser,
    /// Approve or reject a proposed plan.
    PlanApproval,
    /// Confirm a tool invocation.
    ToolConfirm,
    /// Confirm a file-system operation.
    FileOperation,
    /// Application-defined kind served by a registered handler.
    Custom(String),
}

impl Display for InterruptKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AskUser => f.write_str("ask_user"),
            Self::PlanApproval => f.write_str("plan_approval"),
            Self::ToolConfirm => f.write_str("tool_confirm"),
            Self::FileOperation => f.write_str("file_operation"),
            Self::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

/// Lifecycle status for an interrupt request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum InterruptStatus {
    /// Awaiting a human answer.
    Pending,
    /// Answered and consumed.
    Resolved,
    /// Withdrawn before an answer arrived.
    Cancelled,
    /// Expiry passed without a usable answer.
    Expired,
}

impl Display for InterruptStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        })
    }
}

/// Which caller style raised the interrupt; recorded for audit.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FlowOrigin {
    /// The primary conversational flow.
    #[default]
    Master,
    /// A supervising flow driving sub-agents.
    Supervisor,
}

/// Shape of the resume payload the turn executor expects back.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnswerShape {
    /// Typed ask-user answer.
    AskUser,
    /// Generic `{"user_answer": ...}` map.
    #[default]
    Generic,
}

/// Channel and chat a question (or job note) is delivered to.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub struct Destination {
    /// Messaging channel name (e.g. `telegram`, `slack`).
    pub channel: String,
    /// Chat identifier within the channel.
    pub chat_id: String,
}

impl Destination {
    /// Construct a destination.
    #[must_use]
    pub fn new(channel: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
        }
    }

    /// Session key derived from this destination.
    #[must_use]
    pub fn session_key(&self) -> String {
        format!("{}:{}", self.channel, self.chat_id)
    }
}

/// One outstanding suspension awaiting a human answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct InterruptRequest {
    /// Resumable point this request belongs to (the active checkpoint).
    pub checkpoint_id: String,
    /// First checkpoint of the turn; stable across nested suspensions.
    pub original_checkpoint_id: String,
    /// Which suspended sub-computation within the checkpoint asked.
    pub interrupt_id: String,
    /// Where the question is delivered.
    pub destination: Destination,
    /// Owning session.
    pub session_key: String,
    /// Question shown to the human.
    pub question: String,
    /// Suggested answers, possibly empty.
    pub options: Vec<String>,
    /// Interrupt classification.
    pub kind: InterruptKind,
    /// Current lifecycle status.
    pub status: InterruptStatus,
    /// Caller style that raised the interrupt.
    pub origin: FlowOrigin,
    /// Resume payload shape expected by the executor.
    pub answer_shape: AnswerShape,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Deadline after which answers are refused.
    pub expires_at: Option<DateTime<Utc>>,
    /// Higher values are more urgent.
    pub priority: i32,
    /// Type-specific extra data.
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl InterruptRequest {
    /// Construct a pending ask-user request for a fresh checkpoint.
    #[must_use]
    pub fn new(
        checkpoint_id: impl Into<String>,
        session_key: impl Into<String>,
        question: impl Into<String>,
    ) -> Self {
        let checkpoint_id = checkpoint_id.into();
        Self {
            original_checkpoint_id: checkpoint_id.clone(),
            checkpoint_id,
            interrupt_id: Uuid::new_v4().to_string(),
            destination: Destination::default(),
            session_key: session_key.into(),
            question: question.into(),
            options: Vec::new(),
            kind: InterruptKind::AskUser,
            status: InterruptStatus::Pending,
            origin: FlowOrigin::default(),
            answer_shape: AnswerShape::default(),
            created_at: Utc::now(),
            expires_at: None,
            priority: 0,
            metadata: serde_json::Map::new(),
        }
    }

    /// Set the interrupt identifier.
    #[must_use]
    pub fn with_interrupt_id(mut self, interrupt_id: impl Into<String>) -> Self {
        self.interrupt_id = interrupt_id.into();
        self
    }

    /// Set the original checkpoint identifier.
    #[must_use]
    pub fn with_original_checkpoint(mut self, original: impl Into<String>) -> Self {
        self.original_checkpoint_id = original.into();
        self
    }

    /// Set the delivery destination.
    #[must_use]
    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    /// Set the suggested answers.
    #[must_use]
    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = options;
        self
    }

    /// Set the interrupt kind.
    #[must_use]
    pub fn with_kind(mut self, kind: InterruptKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set an explicit expiry.
    #[must_use]
    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether the request is past its expiry at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|deadline| now > deadline)
    }

    /// Whether the request is past its expiry right now.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// A human answer tied to one checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct UserResponse {
    /// Checkpoint being answered.
    pub checkpoint_id: String,
    /// Answer text.
    pub answer: String,
    /// Explicit approve/reject decision, for approval-style kinds.
    pub approved: Option<bool>,
    /// Structured edits to the proposal (e.g. a revised plan).
    pub modifications: Option<serde_json::Value>,
    /// Stamped when the response is submitted.
    pub submitted_at: DateTime<Utc>,
}

impl UserResponse {
    /// Construct a plain text answer.
    #[must_use]
    pub fn new(checkpoint_id: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            checkpoint_id: checkpoint_id.into(),
            answer: answer.into(),
            approved: None,
            modifications: None,
            submitted_at: Utc::now(),
        }
    }

    /// Attach an approve/reject decision.
    #[must_use]
    pub fn with_approval(mut self, approved: bool) -> Self {
        self.approved = Some(approved);
        self
    }

    /// Attach structured modifications.
    #[must_use]
    pub fn with_modifications(mut self, modifications: serde_json::Value) -> Self {
        self.modifications = Some(modifications);
        self
    }
}
