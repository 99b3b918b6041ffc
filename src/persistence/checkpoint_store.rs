//! Checkpoint store: opaque continuation state keyed by checkpoint id.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::driver::BoxFuture;

/// Key to opaque-bytes store the turn executor persists continuation
/// state in.
pub trait CheckpointStore: Send + Sync {
    /// Store `value` under `key`, replacing any earlier value.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Checkpoint` if the backing store cannot be written.
    fn set(&self, key: String, value: Vec<u8>) -> BoxFuture<'_, ()>;

    /// Fetch the value stored under `key`; `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Checkpoint` if the backing store cannot be read.
    fn get(&self, key: String) -> BoxFuture<'_, Option<Vec<u8>>>;

    /// Drop the value stored under `key`; returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Checkpoint` if the backing store cannot be written.
    fn delete(&self, key: String) -> BoxFuture<'_, bool>;
}

/// In-process checkpoint store backed by a locked map.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryCheckpointStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored checkpoints.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store holds no checkpoints.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn set(&self, key: String, value: Vec<u8>) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.entries.write().await.insert(key, value);
            Ok(())
        })
    }

    fn get(&self, key: String) -> BoxFuture<'_, Option<Vec<u8>>> {
        Box::pin(async move { Ok(self.entries.read().await.get(&key).cloned()) })
    }

    fn delete(&self, key: String) -> BoxFuture<'_, bool> {
        Box::pin(async move { Ok(self.entries.write().await.remove(&key).is_some()) })
    }
}
