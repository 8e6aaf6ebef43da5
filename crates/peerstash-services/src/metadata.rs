//! Per-chunk replication metadata.
//!
//! One entry per `(fileId, chunkNo)` the peer has heard about, holding the
//! declared target degree and the set of peers seen holding the chunk. The
//! index is the only place replica counts are derived from.
//!
//! Every mutation is a single `DashMap` entry operation, so concurrent
//! STORED/REMOVED for the same chunk from different receive loops never
//! lose an update.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use dashmap::DashMap;
use peerstash_core::{ChunkKey, FileId, PeerId};
use serde::{Deserialize, Serialize};

use crate::jsonl;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub file_id: FileId,
    pub chunk_no: u32,
    /// Target number of holders, from the latest PUTCHUNK. 0 = not seen yet.
    pub desired_degree: u8,
    /// Peers whose latest event for this chunk was STORED.
    pub holders: BTreeSet<PeerId>,
}

impl ChunkMetadata {
    fn new(key: &ChunkKey, desired_degree: u8) -> Self {
        Self {
            file_id: key.file_id.clone(),
            chunk_no: key.chunk_no,
            desired_degree,
            holders: BTreeSet::new(),
        }
    }

    pub fn key(&self) -> ChunkKey {
        ChunkKey::new(self.file_id.clone(), self.chunk_no)
    }

    /// Observed replication degree.
    pub fn replicas(&self) -> usize {
        self.holders.len()
    }

    pub fn is_under_replicated(&self) -> bool {
        self.replicas() < self.desired_degree as usize
    }
}

#[derive(Clone, Default)]
pub struct MetadataIndex {
    entries: Arc<DashMap<ChunkKey, ChunkMetadata>>,
    persist_path: Arc<Option<PathBuf>>,
    flush_lock: Arc<Mutex<()>>,
}

impl MetadataIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index persisted at `path`. Loads existing entries if the file exists.
    pub fn with_persistence(path: PathBuf) -> Self {
        let index = Self {
            entries: Arc::new(DashMap::new()),
            persist_path: Arc::new(Some(path)),
            flush_lock: Arc::default(),
        };
        index.load_from_disk();
        index
    }

    /// Create-or-update from a PUTCHUNK declaring `desired_degree`.
    pub fn observe_putchunk(&self, key: &ChunkKey, desired_degree: u8) {
        self.entries
            .entry(key.clone())
            .and_modify(|m| m.desired_degree = desired_degree)
            .or_insert_with(|| ChunkMetadata::new(key, desired_degree));
    }

    /// Record `peer` as a holder. Returns the new replica count.
    pub fn add_holder(&self, key: &ChunkKey, peer: PeerId) -> usize {
        let mut entry = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| ChunkMetadata::new(key, 0));
        entry.holders.insert(peer);
        entry.replicas()
    }

    /// Drop `peer` from the holders. Returns the new replica count, or None
    /// if the chunk is unknown.
    pub fn remove_holder(&self, key: &ChunkKey, peer: PeerId) -> Option<usize> {
        self.entries.get_mut(key).map(|mut entry| {
            entry.holders.remove(&peer);
            entry.replicas()
        })
    }

    pub fn replicas(&self, key: &ChunkKey) -> usize {
        self.entries.get(key).map(|e| e.replicas()).unwrap_or(0)
    }

    pub fn desired_degree(&self, key: &ChunkKey) -> Option<u8> {
        self.entries.get(key).map(|e| e.desired_degree)
    }

    /// Snapshot of one entry.
    pub fn get(&self, key: &ChunkKey) -> Option<ChunkMetadata> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    /// Snapshot of every entry for a file, by chunk number.
    pub fn entries_for_file(&self, file_id: &FileId) -> Vec<ChunkMetadata> {
        let mut out: Vec<ChunkMetadata> = self
            .entries
            .iter()
            .filter(|e| &e.key().file_id == file_id)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|m| m.chunk_no);
        out
    }

    /// Remove every entry for a file. Returns how many were removed.
    pub fn purge_file(&self, file_id: &FileId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| &key.file_id != file_id);
        before.saturating_sub(self.entries.len())
    }

    /// Among `stored`, the chunk to evict: lowest declared degree, ties
    /// broken by `(fileId, chunkNo)`. Chunks without an entry count as 0.
    pub fn pick_eviction<'a, I>(&self, stored: I) -> Option<ChunkKey>
    where
        I: IntoIterator<Item = &'a ChunkKey>,
    {
        stored
            .into_iter()
            .map(|key| (self.desired_degree(key).unwrap_or(0), key))
            .min()
            .map(|(_, key)| key.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the index to disk. No-op without a persist path.
    pub fn flush(&self) -> Result<()> {
        let Some(path) = self.persist_path.as_ref() else {
            return Ok(());
        };
        let _guard = self.flush_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut snapshot: Vec<ChunkMetadata> =
            self.entries.iter().map(|e| e.value().clone()).collect();
        snapshot.sort_by_key(|m| m.key());
        jsonl::write_all(path, &snapshot)?;
        tracing::debug!(entries = snapshot.len(), path = %path.display(), "metadata index flushed");
        Ok(())
    }

    /// Load entries from disk. Called once during construction.
    fn load_from_disk(&self) {
        let Some(path) = self.persist_path.as_ref() else {
            return;
        };
        match jsonl::read_all::<ChunkMetadata>(path) {
            Ok(records) => {
                let loaded = records.len();
                for record in records {
                    self.entries.insert(record.key(), record);
                }
                if loaded > 0 {
                    tracing::info!(count = loaded, path = %path.display(), "loaded metadata index");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "failed to load metadata index");
            }
        }
    }
}
