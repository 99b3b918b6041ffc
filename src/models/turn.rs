//! Conversation messages and turn outcomes.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::interrupt::Destination;
use crate::AppError;

/// Prefix of the transport-level "awaiting human" signal.
pub const INTERRUPT_SIGNAL_PREFIX: &str = "INTERRUPT:";

/// Author of a chat message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Instructions to the model.
    System,
    /// Human input.
    User,
    /// Model output.
    Assistant,
}

/// One message in a session history or executor prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    /// Message author.
    pub role: Role,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// System message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// User message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A message arriving from a messaging channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Where the message came from (and where replies go).
    pub destination: Destination,
    /// Sender identifier within the channel.
    pub sender_id: String,
    /// Message text.
    pub content: String,
    /// Explicit session key; derived from the destination when absent.
    pub session_key: Option<String>,
}

impl InboundMessage {
    /// Construct an inbound message.
    #[must_use]
    pub fn new(
        destination: Destination,
        sender_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            destination,
            sender_id: sender_id.into(),
            content: content.into(),
            session_key: None,
        }
    }

    /// Resolve the session key for this message.
    #[must_use]
    pub fn session_key(&self) -> String {
        self.session_key
            .clone()
            .unwrap_or_else(|| self.destination.session_key())
    }
}

/// Result of driving one turn (or one resume hop).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The turn ran to completion and produced this reply.
    Completed(String),
    /// The turn is waiting on a human answer.
    Suspended {
        /// Active checkpoint to resume.
        checkpoint_id: String,
        /// Interrupt within the checkpoint being asked.
        interrupt_id: String,
    },
}

impl TurnOutcome {
    /// Transport signal for a suspended outcome.
    #[must_use]
    pub fn signal(&self) -> Option<InterruptSignal> {
        match self {
            Self::Completed(_) => None,
            Self::Suspended {
                checkpoint_id,
                interrupt_id,
            } => Some(InterruptSignal {
                checkpoint_id: checkpoint_id.clone(),
                interrupt_id: interrupt_id.clone(),
            }),
        }
    }
}

/// Compact `INTERRUPT:<checkpointId>:<interruptId>` marker used at transport
/// boundaries that can only carry strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterruptSignal {
    /// Active checkpoint identifier (may itself contain `:`).
    pub checkpoint_id: String,
    /// Interrupt identifier (never contains `:`).
    pub interrupt_id: String,
}

impl InterruptSignal {
    /// Whether a string carries the interrupt prefix.
    #[must_use]
    pub fn is_signal(raw: &str) -> bool {
        raw.starts_with(INTERRUPT_SIGNAL_PREFIX)
    }
}

impl Display for InterruptSignal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{INTERRUPT_SIGNAL_PREFIX}{}:{}",
            self.checkpoint_id, self.interrupt_id
        )
    }
}

impl FromStr for InterruptSignal {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let body = raw
            .strip_prefix(INTERRUPT_SIGNAL_PREFIX)
            .ok_or_else(|| AppError::ValidationFailed(format!("not an interrupt signal: {raw}")))?;
        match body.rsplit_once(':') {
            Some((checkpoint_id, interrupt_id))
                if !checkpoint_id.is_empty() && !interrupt_id.is_empty() =>
            {
                Ok(Self {
                    checkpoint_id: checkpoint_id.to_owned(),
                    interrupt_id: interrupt_id.to_owned(),
                })
            }
            _ => Err(AppError::ValidationFailed(format!(
                "malformed interrupt signal: {raw}"
            ))),
        }
    }
}
