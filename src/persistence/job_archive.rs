//! Per-day durable archive of terminal background jobs.
//!
//! One pretty-printed JSON file per calendar day (`jobs-YYYY-MM-DD.json`),
//! holding the date, the last-assigned job counter, and the job records in
//! append order. Files are rewritten through a temp file and renamed into
//! place so a crash never leaves a half-written archive.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::models::job::{JobId, JobRecord};
use crate::{AppError, Result};

const FILE_PREFIX: &str = "jobs-";
const FILE_SUFFIX: &str = ".json";

/// Contents of one archive file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ArchiveDay {
    /// Calendar day the file covers (job creation date).
    pub date: NaiveDate,
    /// Highest job counter value assigned when this file was last written.
    #[serde(default)]
    pub last_counter: u64,
    /// Terminal job records in append order.
    #[serde(default)]
    pub jobs: Vec<JobRecord>,
}

impl ArchiveDay {
    fn new(date: NaiveDate) -> Self {
        Self {
            date,
            last_counter: 0,
            jobs: Vec::new(),
        }
    }
}

/// Directory of daily job archive files.
pub struct JobArchive {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JobArchive {
    /// Open (creating if needed) the archive directory.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Archive directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path for `date`.
    #[must_use]
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{FILE_PREFIX}{}{FILE_SUFFIX}", date.format("%Y-%m-%d")))
    }

    /// Append a terminal record to its creation day's file.
    ///
    /// Returns `false` without writing when a record with the same id is
    /// already in that file. The stored counter only ever moves forward.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Archive` if the file cannot be parsed or
    /// replaced, or `AppError::Io` on other file-system failures.
    pub fn append(&self, record: &JobRecord, counter: u64) -> Result<bool> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| AppError::Archive("archive lock poisoned".into()))?;

        let date = record.archive_date();
        let mut day = self.load(date)?.unwrap_or_else(|| ArchiveDay::new(date));
        if day.jobs.iter().any(|job| job.id == record.id) {
            debug!(job_id = %record.id, %date, "job already archived");
            return Ok(false);
        }
        day.last_counter = day.last_counter.max(counter);
        day.jobs.push(record.clone());

        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer_pretty(&mut tmp, &day)?;
        tmp.write_all(b"\n")?;
        tmp.persist(self.path_for(date))
            .map_err(|err| AppError::Archive(format!("failed to replace archive file: {err}")))?;

        debug!(job_id = %record.id, %date, "job archived");
        Ok(true)
    }

    /// Load one day's archive; `None` if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Archive` if the file is not a valid archive.
    pub fn load(&self, date: NaiveDate) -> Result<Option<ArchiveDay>> {
        let path = self.path_for(date);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        let day = serde_json::from_str(&raw)
            .map_err(|err| AppError::Archive(format!("{}: {err}", path.display())))?;
        Ok(Some(day))
    }

    /// Dates that have an archive file, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the directory cannot be read.
    pub fn dates(&self) -> Result<Vec<NaiveDate>> {
        let mut dates = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(stem) = name
                .strip_prefix(FILE_PREFIX)
                .and_then(|rest| rest.strip_suffix(FILE_SUFFIX))
            else {
                continue;
            };
            if let Ok(date) = NaiveDate::parse_from_str(stem, "%Y-%m-%d") {
                dates.push(date);
            }
        }
        dates.sort_unstable();
        Ok(dates)
    }

    /// Records archived for `date`, in append order.
    ///
    /// # Errors
    ///
    /// Returns an error if the day's file exists but cannot be read.
    pub fn list(&self, date: NaiveDate) -> Result<Vec<JobRecord>> {
        Ok(self.load(date)?.map(|day| day.jobs).unwrap_or_default())
    }

    /// Most recent archived record with this id, searching newest day first.
    ///
    /// # Errors
    ///
    /// Returns an error if an archive file cannot be read.
    pub fn find(&self, id: JobId) -> Result<Option<JobRecord>> {
        for date in self.dates()?.into_iter().rev() {
            if let Some(day) = self.load(date)? {
                if let Some(record) = day.jobs.into_iter().rev().find(|job| job.id == id) {
                    return Ok(Some(record));
                }
            }
        }
        Ok(None)
    }

    /// Counter to resume from: the newest file's stored counter, or the
    /// largest id it contains when no counter was stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the newest archive file cannot be read.
    pub fn last_counter(&self) -> Result<Option<u64>> {
        let Some(date) = self.dates()?.pop() else {
            return Ok(None);
        };
        let Some(day) = self.load(date)? else {
            return Ok(None);
        };
        if day.last_counter > 0 {
            return Ok(Some(day.last_counter));
        }
        Ok(day.jobs.iter().map(|job| u64::from(job.id.value())).max())
    }
}
