//! Short-lived suppression state for the replication protocol.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use peerstash_core::{ChunkKey, FileId};

/// Chunks this peer just gave up and must not store again for a while.
#[derive(Clone, Default)]
pub struct IgnoreList {
    until: Arc<DashMap<ChunkKey, Instant>>,
}

impl IgnoreList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: ChunkKey, ttl: Duration) {
        self.until.insert(key, Instant::now() + ttl);
    }

    /// True while the entry has not expired. Expired entries are dropped.
    pub fn contains(&self, key: &ChunkKey) -> bool {
        let now = Instant::now();
        let live = self.until.get(key).map(|t| *t > now);
        match live {
            Some(true) => true,
            Some(false) => {
                self.until.remove_if(key, |_, t| *t <= now);
                false
            }
            None => false,
        }
    }
}

/// Counts PUTCHUNKs seen per chunk, so a delayed re-announce can tell
/// whether someone else already re-announced.
#[derive(Clone, Default)]
pub struct PutchunkWatch {
    seen: Arc<DashMap<ChunkKey, u64>>,
}

impl PutchunkWatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note(&self, key: &ChunkKey) {
        *self.seen.entry(key.clone()).or_insert(0) += 1;
    }

    /// Current count, to compare against later.
    pub fn mark(&self, key: &ChunkKey) -> u64 {
        self.seen.get(key).map(|n| *n).unwrap_or(0)
    }

    pub fn seen_since(&self, key: &ChunkKey, mark: u64) -> bool {
        self.mark(key) > mark
    }

    /// Forget every counter for a file. Returns how many were dropped.
    pub fn purge_file(&self, file_id: &FileId) -> usize {
        let before = self.seen.len();
        self.seen.retain(|k, _| &k.file_id != file_id);
        before.saturating_sub(self.seen.len())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
