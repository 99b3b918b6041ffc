//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
///
/// Every variant is a recoverable outcome returned to the caller; none of
/// them should ever abort the hosting process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Job archive read, write, or (de)serialization failure.
    Archive(String),
    /// Outbound messaging sink failed to deliver a message.
    Delivery(String),
    /// Checkpoint store failure.
    Checkpoint(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Interrupt request passed its expiry before it was answered.
    Expired(String),
    /// Response rejected by the interrupt kind's validator, or invalid input.
    ValidationFailed(String),
    /// Response slot is full; the caller should retry later.
    Backpressure(String),
    /// The session already has a live interrupt from a different turn.
    Conflict(String),
    /// Response slot has already been claimed by another waiter.
    AlreadyConsumed(String),
    /// Background job rejected by admission control.
    AdmissionRejected(String),
    /// Requester does not own the job.
    OwnershipDenied(String),
    /// The turn executor failed.
    Runtime(String),
    /// The caller cancelled the operation or its deadline elapsed.
    Cancelled(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Archive(msg) => write!(f, "archive: {msg}"),
            Self::Delivery(msg) => write!(f, "delivery: {msg}"),
            Self::Checkpoint(msg) => write!(f, "checkpoint: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Expired(msg) => write!(f, "expired: {msg}"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
            Self::Backpressure(msg) => write!(f, "backpressure: {msg}"),
            Self::Conflict(msg) => write!(f, "conflict: {msg}"),
            Self::AlreadyConsumed(msg) => write!(f, "already consumed: {msg}"),
            Self::AdmissionRejected(msg) => write!(f, "admission rejected: {msg}"),
            Self::OwnershipDenied(msg) => write!(f, "ownership denied: {msg}"),
            Self::Runtime(msg) => write!(f, "runtime: {msg}"),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Archive(format!("json: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
