//! Daily-rotating JSONL audit writer.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{NaiveDate, Utc};
use tracing::debug;

use super::{AuditEntry, AuditLogger};
use crate::{AppError, Result};

/// The file currently appended to and the UTC day it belongs to.
struct DayFile {
    date: NaiveDate,
    out: BufWriter<File>,
}

/// Appends one JSON object per line to `<dir>/audit-YYYY-MM-DD.jsonl`.
///
/// The file is chosen by the UTC date of each write, so a long-running
/// process rolls over to a new file at midnight without a restart.
pub struct JsonlAuditWriter {
    dir: PathBuf,
    current: Mutex<Option<DayFile>>,
}

impl JsonlAuditWriter {
    /// Create a writer for `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the directory cannot be created.
    pub fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).map_err(|err| {
            AppError::Io(format!("cannot create audit dir {}: {err}", dir.display()))
        })?;
        Ok(Self {
            dir,
            current: Mutex::new(None),
        })
    }

    /// Path of the audit file for `date`.
    #[must_use]
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("audit-{date}.jsonl"))
    }

    fn open_day(&self, date: NaiveDate) -> Result<DayFile> {
        let path = self.path_for(date);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| AppError::Io(format!("cannot open {}: {err}", path.display())))?;
        debug!(path = %path.display(), "audit file opened");
        Ok(DayFile {
            date,
            out: BufWriter::new(file),
        })
    }
}

impl AuditLogger for JsonlAuditWriter {
    fn log_entry(&self, entry: AuditEntry) -> Result<()> {
        let mut line = serde_json::to_string(&entry)
            .map_err(|err| AppError::Io(format!("cannot encode audit entry: {err}")))?;
        line.push('\n');
        let today = Utc::now().date_naive();

        let mut current = self
            .current
            .lock()
            .map_err(|_| AppError::Io("audit writer lock poisoned".into()))?;
        let day = match current.take() {
            Some(day) if day.date == today => day,
            _ => self.open_day(today)?,
        };
        let day = current.insert(day);

        day.out
            .write_all(line.as_bytes())
            .and_then(|()| day.out.flush())
            .map_err(|err| AppError::Io(format!("audit write failed: {err}")))
    }
}
