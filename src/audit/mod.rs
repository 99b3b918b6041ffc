//! Structured audit logging for interrupt and job lifecycle events.
//!
//! Provides the [`AuditLogger`] trait and associated types. The primary
//! implementation, [`JsonlAuditWriter`], appends JSONL records to
//! daily-rotating files.

pub mod writer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Event type classification for audit log entries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// A turn suspended and its question was registered.
    InterruptRegistered,
    /// An interrupt was answered and consumed.
    InterruptResolved,
    /// An interrupt was withdrawn.
    InterruptCancelled,
    /// An interrupt expired before a usable answer arrived.
    InterruptExpired,
    /// A background job was admitted.
    JobStarted,
    /// A background job reached a terminal state.
    JobCompleted,
}

/// A structured record of one lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// ISO 8601 timestamp with timezone.
    pub timestamp: DateTime<Utc>,
    /// Event classification.
    pub event_type: AuditEventType,
    /// Associated session key.
    pub session_key: Option<String>,
    /// Checkpoint identifier (interrupt events).
    pub checkpoint_id: Option<String>,
    /// Job identifier (job events).
    pub job_id: Option<String>,
    /// Status after the event.
    pub status: Option<String>,
    /// Free-form detail (question, result summary, reason).
    pub detail: Option<String>,
}

impl AuditEntry {
    /// Construct a minimal audit entry for the given event type.
    #[must_use]
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            session_key: None,
            checkpoint_id: None,
            job_id: None,
            status: None,
            detail: None,
        }
    }

    /// Set the session key for this entry.
    #[must_use]
    pub fn with_session(mut self, session_key: impl Into<String>) -> Self {
        self.session_key = Some(session_key.into());
        self
    }

    /// Set the checkpoint identifier for this entry.
    #[must_use]
    pub fn with_checkpoint(mut self, checkpoint_id: impl Into<String>) -> Self {
        self.checkpoint_id = Some(checkpoint_id.into());
        self
    }

    /// Set the job identifier for this entry.
    #[must_use]
    pub fn with_job(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    /// Set the status for this entry.
    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Set the detail text for this entry.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Writes structured audit entries to a persistent store.
///
/// Implementations must be [`Send`] and [`Sync`] to allow sharing across
/// async task boundaries via [`std::sync::Arc`].
pub trait AuditLogger: Send + Sync {
    /// Record a single audit entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write operation fails.
    fn log_entry(&self, entry: AuditEntry) -> crate::Result<()>;
}

/// Record an entry if a logger is configured; failures are only logged.
pub(crate) fn record(logger: Option<&dyn AuditLogger>, entry: AuditEntry) {
    if let Some(logger) = logger {
        if let Err(err) = logger.log_entry(entry) {
            warn!(%err, "failed to write audit entry");
        }
    }
}

pub use writer::JsonlAuditWriter;
