//! Registry of live progress channels for transfers running in this process.
//!
//! Each transfer worker owns a `watch::Sender`; the registry keeps the matching
//! receiver so progress readers see bytes that were sent but not yet persisted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use uuid::Uuid;

/// Progress update sent through the watch channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// Absolute byte offset reached in the artifact.
    pub transferred: u64,
    /// Artifact size in bytes.
    pub total: u64,
}

impl ProgressUpdate {
    pub const fn new(transferred: u64, total: u64) -> Self {
        Self { transferred, total }
    }
}

/// Live progress channels keyed by token id.
#[derive(Default)]
pub struct LiveProgressRegistry {
    channels: Mutex<HashMap<Uuid, (u64, watch::Receiver<ProgressUpdate>)>>,
    next_generation: AtomicU64,
}

impl LiveProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a channel for `token_id`, replacing any stale one.
    ///
    /// The channel is removed again when the returned handle is dropped.
    pub fn register(self: &Arc<Self>, token_id: Uuid, start: u64, total: u64) -> LiveProgress {
        let (tx, rx) = watch::channel(ProgressUpdate::new(start, total));
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token_id, (generation, rx));
        LiveProgress {
            token_id,
            generation,
            tx,
            registry: Arc::clone(self),
        }
    }

    /// Latest update for `token_id`, if a transfer is running.
    pub fn current(&self, token_id: &Uuid) -> Option<ProgressUpdate> {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(token_id)
            .map(|(_, rx)| rx.borrow().clone())
    }

    /// Number of transfers currently publishing progress.
    pub fn active_count(&self) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn remove(&self, token_id: &Uuid, generation: u64) {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        // A newer transfer for the same token may have replaced our entry.
        if channels.get(token_id).is_some_and(|(g, _)| *g == generation) {
            channels.remove(token_id);
        }
    }
}

/// Publishing side of one transfer's progress channel.
pub struct LiveProgress {
    token_id: Uuid,
    generation: u64,
    tx: watch::Sender<ProgressUpdate>,
    registry: Arc<LiveProgressRegistry>,
}

impl LiveProgress {
    /// Publish the absolute offset reached.
    pub fn update(&self, transferred: u64) {
        // send_modify is infallible even with no reader left
        self.tx.send_modify(|state| state.transferred = transferred);
    }
}

impl Drop for LiveProgress {
    fn drop(&mut self) {
        self.registry.remove(&self.token_id, self.generation);
    }
}
