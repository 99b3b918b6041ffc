//! Best-effort post-processing run after a turn completes.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::driver::{BoxFuture, SessionStore};

/// A turn that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedTurn {
    /// Session the turn belonged to.
    pub session_key: String,
    /// Original checkpoint of the turn.
    pub checkpoint_id: String,
    /// Final reply text.
    pub reply: String,
}

/// Work that runs after a completed turn. Failures are logged and never
/// fail the turn.
pub trait PostTurnHook: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Run the hook.
    ///
    /// # Errors
    ///
    /// Any error is logged by the caller and otherwise ignored.
    fn after_turn(&self, turn: CompletedTurn) -> BoxFuture<'_, ()>;
}

/// Trims session history to the newest `keep` messages.
pub struct HistoryCompaction {
    sessions: Arc<dyn SessionStore>,
    keep: usize,
}

impl HistoryCompaction {
    /// Compact `sessions` down to `keep` messages after each turn.
    #[must_use]
    pub fn new(sessions: Arc<dyn SessionStore>, keep: usize) -> Self {
        Self { sessions, keep }
    }
}

impl PostTurnHook for HistoryCompaction {
    fn name(&self) -> &'static str {
        "history_compaction"
    }

    fn after_turn(&self, turn: CompletedTurn) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let removed = self
                .sessions
                .truncate(turn.session_key.clone(), self.keep)
                .await?;
            if removed > 0 {
                debug!(session_key = %turn.session_key, removed, "session history compacted");
            }
            Ok(())
        })
    }
}

/// Run every hook in order, logging failures.
pub(crate) async fn run_all(hooks: &[Arc<dyn PostTurnHook>], turn: &CompletedTurn) {
    for hook in hooks {
        if let Err(err) = hook.after_turn(turn.clone()).await {
            warn!(hook = hook.name(), session_key = %turn.session_key, %err, "post-turn hook failed");
        }
    }
}
