//! Bounded FIFO audit history of registered interrupts.

use std::collections::{BTreeMap, VecDeque};

use crate::models::interrupt::{InterruptRequest, InterruptStatus};

/// Counts over the history ring plus the live pending total.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterruptStats {
    /// Requests currently live in the registry.
    pub pending: usize,
    /// Entries currently retained in history.
    pub history_len: usize,
    /// History entries grouped by interrupt kind.
    pub by_kind: BTreeMap<String, usize>,
    /// History entries grouped by lifecycle status.
    pub by_status: BTreeMap<InterruptStatus, usize>,
}

/// Append-only ring; the oldest entry is evicted first regardless of status.
pub(crate) struct HistoryRing {
    capacity: usize,
    entries: VecDeque<InterruptRequest>,
}

impl HistoryRing {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub(crate) fn push(&mut self, request: InterruptRequest) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(request);
    }

    /// Update the status of the newest copy of `checkpoint_id`, if retained.
    pub(crate) fn set_status(&mut self, checkpoint_id: &str, status: InterruptStatus) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .rev()
            .find(|entry| entry.checkpoint_id == checkpoint_id)
        {
            entry.status = status;
        }
    }

    /// Oldest-first copy of the newest `limit` entries (all when `None`).
    pub(crate) fn snapshot(&self, limit: Option<usize>) -> Vec<InterruptRequest> {
        let take = limit.unwrap_or(self.entries.len()).min(self.entries.len());
        self.entries
            .iter()
            .skip(self.entries.len() - take)
            .cloned()
            .collect()
    }

    pub(crate) fn stats(&self, pending: usize) -> InterruptStats {
        let mut stats = InterruptStats {
            pending,
            history_len: self.entries.len(),
            ..InterruptStats::default()
        };
        for entry in &self.entries {
            *stats.by_kind.entry(entry.kind.to_string()).or_default() += 1;
            *stats.by_status.entry(entry.status).or_default() += 1;
        }
        stats
    }
}
