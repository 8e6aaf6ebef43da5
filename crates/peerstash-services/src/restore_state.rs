//! Restore-side bookkeeping.
//!
//! `RestoreAccumulator` collects CHUNK payloads for files this peer is
//! restoring. `AnsweredChunks` lets a holder skip replying to a GETCHUNK
//! another peer already answered in the current round.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use peerstash_core::{ChunkKey, FileId};

#[derive(Clone, Default)]
pub struct RestoreAccumulator {
    files: Arc<DashMap<FileId, BTreeMap<u32, Bytes>>>,
}

impl RestoreAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start collecting for a file. Returns false if a restore is already
    /// active for it.
    pub fn begin(&self, file_id: &FileId) -> bool {
        match self.files.entry(file_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(BTreeMap::new());
                true
            }
        }
    }

    pub fn is_active(&self, file_id: &FileId) -> bool {
        self.files.contains_key(file_id)
    }

    /// Keep a payload if a restore of its file is active. First copy wins.
    pub fn insert(&self, key: &ChunkKey, body: Bytes) -> bool {
        match self.files.get_mut(&key.file_id) {
            Some(mut chunks) => {
                chunks.entry(key.chunk_no).or_insert(body);
                true
            }
            None => false,
        }
    }

    /// Chunk numbers in `0..count` not yet received.
    pub fn missing(&self, file_id: &FileId, count: u32) -> Vec<u32> {
        match self.files.get(file_id) {
            Some(chunks) => (0..count).filter(|n| !chunks.contains_key(n)).collect(),
            None => (0..count).collect(),
        }
    }

    pub fn received(&self, file_id: &FileId) -> usize {
        self.files.get(file_id).map(|c| c.len()).unwrap_or(0)
    }

    /// Stop collecting and hand back what arrived.
    pub fn finish(&self, file_id: &FileId) -> Option<BTreeMap<u32, Bytes>> {
        self.files.remove(file_id).map(|(_, chunks)| chunks)
    }
}

#[derive(Clone, Default)]
pub struct AnsweredChunks {
    answered: Arc<DashSet<ChunkKey>>,
}

impl AnsweredChunks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a CHUNK seen on the wire. Chunk 0 starts a new round for the
    /// file, so earlier marks for it are cleared first.
    pub fn mark(&self, key: &ChunkKey) {
        if key.chunk_no == 0 {
            self.answered.retain(|k| k.file_id != key.file_id);
        }
        self.answered.insert(key.clone());
    }

    /// A new GETCHUNK re-opens the chunk.
    pub fn reset(&self, key: &ChunkKey) {
        self.answered.remove(key);
    }

    pub fn is_answered(&self, key: &ChunkKey) -> bool {
        self.answered.contains(key)
    }

    /// Forget every mark for a file. Returns how many were dropped.
    pub fn purge_file(&self, file_id: &FileId) -> usize {
        let before = self.answered.len();
        self.answered.retain(|k| &k.file_id != file_id);
        before.saturating_sub(self.answered.len())
    }

    pub fn len(&self) -> usize {
        self.answered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.answered.is_empty()
    }
}
