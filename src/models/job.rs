//! Background job models.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::interrupt::Destination;
use crate::AppError;

/// Size of the cyclic job id space; ids are rendered as six digits.
pub const JOB_ID_MODULUS: u32 = 1_000_000;

/// Fixed-width numeric job identifier.
///
/// `"7"` and `"000007"` parse to the same id; it always renders padded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(u32);

impl JobId {
    /// Build an id from a raw counter value, wrapping into the id space.
    #[must_use]
    pub fn from_counter(value: u64) -> Self {
        // The modulus fits in u32, so the remainder always does too.
        Self(u32::try_from(value % u64::from(JOB_ID_MODULUS)).unwrap_or_default())
    }

    /// Numeric value of the id.
    #[must_use]
    pub fn value(self) -> u32 {
        self.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:06}", self.0)
    }
}

impl FromStr for JobId {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let value: u32 = trimmed
            .parse()
            .map_err(|_| AppError::ValidationFailed(format!("invalid job id: {raw:?}")))?;
        if value >= JOB_ID_MODULUS {
            return Err(AppError::ValidationFailed(format!(
                "job id out of range: {raw:?}"
            )));
        }
        Ok(Self(value))
    }
}

impl TryFrom<String> for JobId {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.to_string()
    }
}

/// Lifecycle status for a background job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Admitted, worker not yet running.
    Pending,
    /// Worker is executing the turn.
    Running,
    /// Turn completed successfully.
    Finished,
    /// Turn failed, suspended, or hit its deadline.
    Failed,
    /// Stopped on request.
    Stopped,
}

impl JobStatus {
    /// Whether no further transitions are possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Stopped)
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        })
    }
}

/// Who started a job and where its completion note goes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOrigin {
    /// Session the job was started from.
    pub session_key: String,
    /// Destination for the completion note.
    pub destination: Destination,
    /// Owner key checked by stop requests; empty means unowned.
    pub owner: String,
}

impl JobOrigin {
    /// Construct an origin; the session key is derived from the destination.
    #[must_use]
    pub fn new(destination: Destination, owner: impl Into<String>) -> Self {
        Self {
            session_key: destination.session_key(),
            destination,
            owner: owner.into(),
        }
    }
}

/// Durable record of a job, as stored in the daily archive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct JobRecord {
    /// Job identifier.
    pub id: JobId,
    /// Work description handed to the executor.
    pub work: String,
    /// Status at the time of the snapshot.
    pub status: JobStatus,
    /// Result summary or failure reason.
    #[serde(default)]
    pub result: String,
    /// Originating session.
    #[serde(default)]
    pub session_key: String,
    /// Completion note destination.
    pub destination: Destination,
    /// Owner key.
    #[serde(default)]
    pub owner: String,
    /// Creation timestamp; selects the archive file.
    pub created_at: DateTime<Utc>,
    /// Terminal transition timestamp.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Calendar day (UTC) of the job's archive partition.
    #[must_use]
    pub fn archive_date(&self) -> NaiveDate {
        self.created_at.date_naive()
    }
}

/// Point-in-time view of a job returned by queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    /// Job record.
    pub record: JobRecord,
    /// Recent log lines; empty for archived jobs.
    pub logs: Vec<String>,
    /// Whether the job is still held in memory.
    pub live: bool,
}
