//! Background job manager.
//!
//! Runs agent turns with no human in the loop. Admission is bounded by an
//! atomic active-job counter that is incremented on admission and
//! decremented exactly once, on a job's first terminal transition. Each job
//! runs on its own worker task under a child of the manager's shutdown
//! token, optionally bounded by a wall-clock deadline. Terminal jobs are
//! written to the per-day archive and then dropped from memory.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, info_span, warn, Instrument};

use super::flow::drain;
use crate::audit::{self, AuditEntry, AuditEventType, AuditLogger};
use crate::config::{FlowConfig, JobConfig};
use crate::driver::{MessageSink, RunRequest, TurnExecutor};
use crate::models::job::{JobId, JobOrigin, JobRecord, JobSnapshot, JobStatus};
use crate::models::turn::ChatMessage;
use crate::persistence::job_archive::JobArchive;
use crate::{AppError, Result};

const BACKGROUND_INSTRUCTION: &str = "You are running as a background job. No one is \
available to answer questions: do not ask the user anything, make reasonable assumptions \
and report what you did.";

const DEADLINE_EXCEEDED: &str = "deadline exceeded";

struct LiveJob {
    record: JobRecord,
    logs: VecDeque<String>,
    log_capacity: usize,
    cancel: CancellationToken,
}

impl LiveJob {
    fn log(&mut self, line: impl AsRef<str>) {
        while self.logs.len() >= self.log_capacity {
            self.logs.pop_front();
        }
        self.logs
            .push_back(format!("{} {}", Utc::now().format("%H:%M:%S"), line.as_ref()));
    }

    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            record: self.record.clone(),
            logs: self.logs.iter().cloned().collect(),
            live: true,
        }
    }
}

/// Concurrency-bounded scheduler for background agent turns.
pub struct JobManager {
    config: JobConfig,
    max_steps: u32,
    executor: Arc<dyn TurnExecutor>,
    archive: Arc<JobArchive>,
    jobs: RwLock<HashMap<JobId, LiveJob>>,
    active: AtomicUsize,
    counter: AtomicU64,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    sink: Option<Arc<dyn MessageSink>>,
    audit: Option<Arc<dyn AuditLogger>>,
}

impl JobManager {
    /// Create a manager, restoring the id counter from the archive.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive directory cannot be created or its
    /// newest file cannot be read.
    pub fn new(config: JobConfig, executor: Arc<dyn TurnExecutor>) -> Result<Self> {
        let archive = JobArchive::open(config.archive_dir.clone())?;
        let counter = archive.last_counter()?.unwrap_or(0);
        info!(counter, archive_dir = %archive.dir().display(), "job counter restored");
        Ok(Self {
            config,
            max_steps: FlowConfig::default().max_steps,
            executor,
            archive: Arc::new(archive),
            jobs: RwLock::new(HashMap::new()),
            active: AtomicUsize::new(0),
            counter: AtomicU64::new(counter),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            sink: None,
            audit: None,
        })
    }

    /// Step budget handed to the executor for each job.
    #[must_use]
    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Announce terminal jobs to their origin destination through `sink`.
    #[must_use]
    pub fn with_completion_sink(mut self, sink: Arc<dyn MessageSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Record job lifecycle events through `audit`.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Admit a job and launch its worker; returns immediately.
    ///
    /// # Errors
    ///
    /// - `AppError::ValidationFailed` if `work` is blank.
    /// - `AppError::AdmissionRejected` if the concurrency limit is reached;
    ///   no record is created and the id counter does not move.
    /// - `AppError::Cancelled` after [`shutdown`](Self::shutdown).
    pub async fn start_job(self: &Arc<Self>, work: &str, origin: JobOrigin) -> Result<JobId> {
        let work = work.trim();
        if work.is_empty() {
            return Err(AppError::ValidationFailed("job work must not be empty".into()));
        }
        if self.shutdown.is_cancelled() {
            return Err(AppError::Cancelled("job manager is shut down".into()));
        }
        if !self.try_admit() {
            return Err(AppError::AdmissionRejected(format!(
                "concurrent job limit reached ({}/{})",
                self.active.load(Ordering::SeqCst),
                self.config.max_concurrent
            )));
        }

        let counter = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let id = JobId::from_counter(counter);
        let record = JobRecord {
            id,
            work: work.to_owned(),
            status: JobStatus::Pending,
            result: String::new(),
            session_key: origin.session_key,
            destination: origin.destination,
            owner: origin.owner,
            created_at: Utc::now(),
            completed_at: None,
        };
        let cancel = self.shutdown.child_token();

        {
            let mut jobs = self.jobs.write().await;
            if jobs.contains_key(&id) {
                self.active.fetch_sub(1, Ordering::SeqCst);
                return Err(AppError::Conflict(format!(
                    "job id {id} is still live after wrapping"
                )));
            }
            let mut job = LiveJob {
                record,
                logs: VecDeque::new(),
                log_capacity: self.config.log_capacity.max(1),
                cancel: cancel.clone(),
            };
            job.log("status -> pending");
            audit::record(
                self.audit.as_deref(),
                AuditEntry::new(AuditEventType::JobStarted)
                    .with_session(job.record.session_key.clone())
                    .with_job(id.to_string())
                    .with_status(JobStatus::Pending.to_string())
                    .with_detail(work),
            );
            jobs.insert(id, job);
        }

        info!(job_id = %id, "job admitted");
        let manager = Arc::clone(self);
        let work = work.to_owned();
        self.tracker.spawn(
            async move { manager.run_worker(id, work, cancel).await }
                .instrument(info_span!("job_worker", job_id = %id)),
        );
        Ok(id)
    }

    /// Request cancellation of a live job.
    ///
    /// Returns `(true, Stopped)` if the job was stopped by this call and
    /// `(false, status)` if it had already reached a terminal state.
    ///
    /// # Errors
    ///
    /// - `AppError::ValidationFailed` for a malformed id.
    /// - `AppError::NotFound` if the job is neither live nor archived.
    /// - `AppError::OwnershipDenied` if `requester` does not own the job.
    pub async fn stop_job(&self, id: &str, requester: &str) -> Result<(bool, JobStatus)> {
        let id: JobId = id.parse()?;
        {
            let mut jobs = self.jobs.write().await;
            if let Some(job) = jobs.get_mut(&id) {
                check_owner(&job.record, requester)?;
                if job.record.status.is_terminal() {
                    return Ok((false, job.record.status));
                }
                job.cancel.cancel();
                self.mark_terminal(job, JobStatus::Stopped, "stopped on request".into());
                info!(job_id = %id, "job stopped");
                return Ok((true, JobStatus::Stopped));
            }
        }

        let record = self
            .archived(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {id} not found")))?;
        check_owner(&record, requester)?;
        Ok((false, record.status))
    }

    /// Look up a job, live first, then in the archive.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ValidationFailed` for a malformed id or an archive
    /// error if the archive cannot be read.
    pub async fn get_job(&self, id: &str) -> Result<Option<JobSnapshot>> {
        let id: JobId = id.parse()?;
        if let Some(job) = self.jobs.read().await.get(&id) {
            return Ok(Some(job.snapshot()));
        }
        Ok(self.archived(id).await?.map(|record| JobSnapshot {
            record,
            logs: Vec::new(),
            live: false,
        }))
    }

    /// Jobs created on `date` (today, UTC, when `None`), archived and live,
    /// ordered by creation time.
    ///
    /// # Errors
    ///
    /// Returns an archive error if the day's file cannot be read.
    pub async fn list_jobs(&self, date: Option<NaiveDate>) -> Result<Vec<JobRecord>> {
        let date = date.unwrap_or_else(|| Utc::now().date_naive());
        let archive = Arc::clone(&self.archive);
        let mut records = blocking(move || archive.list(date)).await?;
        {
            let jobs = self.jobs.read().await;
            for job in jobs.values() {
                if job.record.archive_date() == date
                    && !records.iter().any(|record| record.id == job.record.id)
                {
                    records.push(job.record.clone());
                }
            }
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    /// Jobs currently counted against the concurrency limit.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Last raw counter value handed out.
    #[must_use]
    pub fn last_counter(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    /// Cancel every live job, wait for their workers to persist them, and
    /// refuse new jobs.
    pub async fn shutdown(&self) {
        info!("job manager shutting down");
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }

    fn try_admit(&self) -> bool {
        let limit = self.config.max_concurrent;
        self.active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |active| {
                (active < limit).then_some(active + 1)
            })
            .is_ok()
    }

    /// Apply a terminal status; only the first terminal transition counts.
    fn mark_terminal(&self, job: &mut LiveJob, status: JobStatus, result: String) -> bool {
        if job.record.status.is_terminal() {
            return false;
        }
        job.record.status = status;
        job.record.result = result;
        job.record.completed_at = Some(Utc::now());
        job.log(format!("status -> {status}"));
        self.active.fetch_sub(1, Ordering::SeqCst);
        true
    }

    async fn run_worker(self: Arc<Self>, id: JobId, work: String, cancel: CancellationToken) {
        let started = {
            let mut jobs = self.jobs.write().await;
            match jobs.get_mut(&id) {
                Some(job) if job.record.status == JobStatus::Pending => {
                    job.record.status = JobStatus::Running;
                    job.log("status -> running");
                    true
                }
                _ => false,
            }
        };

        let (status, result) = if started {
            let outcome = match self.config.deadline() {
                Some(deadline) => {
                    tokio::time::timeout(deadline, self.execute(id, &work, &cancel))
                        .await
                        .unwrap_or_else(|_| Err(DEADLINE_EXCEEDED.to_owned()))
                }
                None => self.execute(id, &work, &cancel).await,
            };
            if cancel.is_cancelled() {
                (JobStatus::Stopped, "stopped on request".to_owned())
            } else {
                match outcome {
                    Ok(reply) => (JobStatus::Finished, reply),
                    Err(reason) => (JobStatus::Failed, reason),
                }
            }
        } else {
            (JobStatus::Stopped, "stopped before start".to_owned())
        };

        self.finish(id, status, result).await;
    }

    async fn execute(
        &self,
        id: JobId,
        work: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<String, String> {
        let request = RunRequest {
            checkpoint_id: format!("job:{id}"),
            messages: vec![
                ChatMessage::system(BACKGROUND_INSTRUCTION),
                ChatMessage::user(work),
            ],
            max_steps: self.max_steps,
            allow_user_questions: false,
        };

        let stream = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err("cancelled".to_owned()),
            stream = self.executor.run(request) => stream.map_err(|err| err.to_string())?,
        };
        let drained = drain(stream, cancel).await.map_err(|err| err.to_string())?;

        if drained.suspension().is_some() {
            return Err("background jobs cannot ask for user input".to_owned());
        }
        if let Some(err) = drained.error {
            return Err(err.to_string());
        }
        if let Some(job) = self.jobs.write().await.get_mut(&id) {
            job.log(format!("reply: {}", preview(&drained.reply)));
        }
        Ok(drained.reply)
    }

    async fn finish(&self, id: JobId, status: JobStatus, result: String) {
        let record = {
            let mut jobs = self.jobs.write().await;
            let Some(job) = jobs.get_mut(&id) else {
                return;
            };
            self.mark_terminal(job, status, result);
            job.record.clone()
        };

        let archive = Arc::clone(&self.archive);
        let counter = self.counter.load(Ordering::SeqCst);
        let to_archive = record.clone();
        match blocking(move || archive.append(&to_archive, counter)).await {
            Ok(written) => {
                debug!(job_id = %id, written, "job persisted");
                self.jobs.write().await.remove(&id);
            }
            Err(err) => warn!(job_id = %id, %err, "failed to archive job; keeping it in memory"),
        }

        info!(job_id = %id, status = %record.status, "job finished");
        audit::record(
            self.audit.as_deref(),
            AuditEntry::new(AuditEventType::JobCompleted)
                .with_session(record.session_key.clone())
                .with_job(id.to_string())
                .with_status(record.status.to_string())
                .with_detail(record.result.clone()),
        );
        self.notify(&record).await;
    }

    async fn notify(&self, record: &JobRecord) {
        let Some(sink) = self.sink.as_ref() else {
            return;
        };
        if record.destination.channel.is_empty() {
            return;
        }
        let text = format!("Job {} {}: {}", record.id, record.status, record.result);
        if let Err(err) = sink.publish(record.destination.clone(), text).await {
            warn!(job_id = %record.id, %err, "failed to deliver job completion note");
        }
    }

    async fn archived(&self, id: JobId) -> Result<Option<JobRecord>> {
        let archive = Arc::clone(&self.archive);
        blocking(move || archive.find(id)).await
    }
}

fn check_owner(record: &JobRecord, requester: &str) -> Result<()> {
    if record.owner == requester {
        Ok(())
    } else {
        Err(AppError::OwnershipDenied(format!(
            "job {} belongs to another owner",
            record.id
        )))
    }
}

fn preview(text: &str) -> String {
    const MAX: usize = 200;
    match text.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_owned(),
    }
}

async fn blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|err| AppError::Runtime(format!("archive task failed: {err}")))?
}
