//! Live interrupt indices kept consistent behind one type.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::models::interrupt::{InterruptRequest, UserResponse};

/// A live request plus its single-use response slot.
pub(crate) struct PendingEntry {
    pub(crate) request: InterruptRequest,
    pub(crate) response_tx: Option<oneshot::Sender<UserResponse>>,
    pub(crate) response_rx: Option<oneshot::Receiver<UserResponse>>,
}

impl PendingEntry {
    fn new(request: InterruptRequest) -> Self {
        let mut entry = Self {
            request,
            response_tx: None,
            response_rx: None,
        };
        entry.rearm();
        entry
    }

    /// Install a fresh, empty response slot.
    pub(crate) fn rearm(&mut self) {
        let (tx, rx) = oneshot::channel();
        self.response_tx = Some(tx);
        self.response_rx = Some(rx);
    }
}

/// Requests indexed by checkpoint id, with a derived session index.
///
/// Every entry with a non-empty session key has exactly one session-index
/// entry pointing back at its checkpoint id, and vice versa.
#[derive(Default)]
pub(crate) struct PendingIndex {
    by_checkpoint: HashMap<String, PendingEntry>,
    by_session: HashMap<String, String>,
}

impl PendingIndex {
    pub(crate) fn len(&self) -> usize {
        self.by_checkpoint.len()
    }

    pub(crate) fn contains(&self, checkpoint_id: &str) -> bool {
        self.by_checkpoint.contains_key(checkpoint_id)
    }

    pub(crate) fn get(&self, checkpoint_id: &str) -> Option<&PendingEntry> {
        self.by_checkpoint.get(checkpoint_id)
    }

    pub(crate) fn get_mut(&mut self, checkpoint_id: &str) -> Option<&mut PendingEntry> {
        self.by_checkpoint.get_mut(checkpoint_id)
    }

    pub(crate) fn for_session(&self, session_key: &str) -> Option<&PendingEntry> {
        self.by_session
            .get(session_key)
            .and_then(|checkpoint_id| self.by_checkpoint.get(checkpoint_id))
    }

    /// Live request whose active or original checkpoint matches `id`.
    pub(crate) fn find(&self, id: &str) -> Option<&PendingEntry> {
        self.by_checkpoint.get(id).or_else(|| {
            self.by_checkpoint
                .values()
                .find(|entry| entry.request.original_checkpoint_id == id)
        })
    }

    /// Insert a request; the caller guarantees the checkpoint and session
    /// slots are free.
    pub(crate) fn insert(&mut self, request: InterruptRequest) {
        let checkpoint_id = request.checkpoint_id.clone();
        if !request.session_key.is_empty() {
            self.by_session
                .insert(request.session_key.clone(), checkpoint_id.clone());
        }
        self.by_checkpoint
            .insert(checkpoint_id, PendingEntry::new(request));
        self.debug_check();
    }

    pub(crate) fn remove(&mut self, checkpoint_id: &str) -> Option<PendingEntry> {
        let entry = self.by_checkpoint.remove(checkpoint_id)?;
        let session_key = &entry.request.session_key;
        if self
            .by_session
            .get(session_key)
            .is_some_and(|mapped| mapped == checkpoint_id)
        {
            self.by_session.remove(session_key);
        }
        self.debug_check();
        Some(entry)
    }

    pub(crate) fn expired_ids(&self, now: DateTime<Utc>) -> Vec<String> {
        self.by_checkpoint
            .values()
            .filter(|entry| entry.request.is_expired_at(now))
            .map(|entry| entry.request.checkpoint_id.clone())
            .collect()
    }

    fn debug_check(&self) {
        debug_assert!(self.by_session.iter().all(|(session, checkpoint)| self
            .by_checkpoint
            .get(checkpoint)
            .is_some_and(|entry| &entry.request.session_key == session)));
        debug_assert!(self
            .by_checkpoint
            .values()
            .filter(|entry| !entry.request.session_key.is_empty())
            .all(|entry| self.by_session.get(&entry.request.session_key)
                == Some(&entry.request.checkpoint_id)));
    }
}
