//! In-memory session history.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::driver::{BoxFuture, SessionStore};
use crate::models::turn::ChatMessage;

/// Session history held in process memory; lost on restart.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Vec<ChatMessage>>>,
}

impl MemorySessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn history(&self, session_key: String) -> BoxFuture<'_, Vec<ChatMessage>> {
        Box::pin(async move {
            Ok(self
                .sessions
                .read()
                .await
                .get(&session_key)
                .cloned()
                .unwrap_or_default())
        })
    }

    fn append(&self, session_key: String, message: ChatMessage) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.sessions
                .write()
                .await
                .entry(session_key)
                .or_default()
                .push(message);
            Ok(())
        })
    }

    fn truncate(&self, session_key: String, keep: usize) -> BoxFuture<'_, usize> {
        Box::pin(async move {
            let mut sessions = self.sessions.write().await;
            let Some(messages) = sessions.get_mut(&session_key) else {
                return Ok(0);
            };
            let removed = messages.len().saturating_sub(keep);
            messages.drain(..removed);
            Ok(removed)
        })
    }
}
