//! Explicitly constructed runtime state shared by a hosting process.

use std::sync::Arc;

use tracing::info;

use crate::audit::{AuditLogger, JsonlAuditWriter};
use crate::config::GlobalConfig;
use crate::driver::{MessageSink, SessionStore, TurnExecutor};
use crate::interrupt::InterruptRegistry;
use crate::orchestrator::{JobManager, ResumableFlow};
use crate::Result;

/// Registry, flow and job manager wired from one configuration.
pub struct AppState {
    /// Loaded configuration.
    pub config: Arc<GlobalConfig>,
    /// Live interrupts.
    pub registry: Arc<InterruptRegistry>,
    /// Interactive turn driver.
    pub flow: Arc<ResumableFlow>,
    /// Background job scheduler.
    pub jobs: Arc<JobManager>,
}

impl AppState {
    /// Wire every component from `config` and the host's collaborators.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the audit or archive directory cannot be
    /// created, or an archive error if the job counter cannot be restored.
    pub fn build(
        config: GlobalConfig,
        executor: Arc<dyn TurnExecutor>,
        sink: Arc<dyn MessageSink>,
        sessions: Arc<dyn SessionStore>,
    ) -> Result<Self> {
        let audit: Option<Arc<dyn AuditLogger>> = match &config.audit_dir {
            Some(dir) => Some(Arc::new(JsonlAuditWriter::new(dir.clone())?)),
            None => None,
        };

        let mut registry =
            InterruptRegistry::new(config.interrupts.clone()).with_sink(Arc::clone(&sink));
        if let Some(audit) = &audit {
            registry = registry.with_audit(Arc::clone(audit));
        }
        let registry = Arc::new(registry);

        let flow = ResumableFlow::new(
            Arc::clone(&registry),
            Arc::clone(&executor),
            sessions,
            config.flow.clone(),
        );

        let mut jobs = JobManager::new(config.jobs.clone(), executor)?
            .with_max_steps(config.flow.max_steps)
            .with_completion_sink(sink);
        if let Some(audit) = audit {
            jobs = jobs.with_audit(audit);
        }

        info!(
            max_pending = config.interrupts.max_pending,
            max_concurrent_jobs = config.jobs.max_concurrent,
            audit = config.audit_dir.is_some(),
            "runtime state built"
        );

        Ok(Self {
            config: Arc::new(config),
            registry,
            flow: Arc::new(flow),
            jobs: Arc::new(jobs),
        })
    }

    /// Stop background work; live jobs are stopped and archived.
    pub async fn shutdown(&self) {
        self.jobs.shutdown().await;
    }
}
