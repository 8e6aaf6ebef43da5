//! Persistent file-level records: the deleted-file ledger and the backup
//! catalog. Both are rewritten on every change.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use dashmap::{DashMap, DashSet};
use peerstash_core::FileId;
use serde::{Deserialize, Serialize};

use crate::jsonl;

// ── Deleted ledger ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DeletedRecord {
    file_id: FileId,
}

/// File ids this peer was told to delete. Append-only.
///
/// Stale PUTCHUNK/STORED for these files are ignored, and GET_DELETED for
/// them is answered with DELETE.
#[derive(Clone, Default)]
pub struct DeletedLedger {
    ids: Arc<DashSet<FileId>>,
    persist_path: Arc<Option<PathBuf>>,
    write_lock: Arc<Mutex<()>>,
}

impl DeletedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_persistence(path: PathBuf) -> Self {
        let ledger = Self {
            ids: Arc::new(DashSet::new()),
            persist_path: Arc::new(Some(path)),
            write_lock: Arc::default(),
        };
        if let Some(path) = ledger.persist_path.as_ref() {
            match jsonl::read_all::<DeletedRecord>(path) {
                Ok(records) => {
                    for r in records {
                        ledger.ids.insert(r.file_id);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, path = %path.display(), "failed to load deleted ledger")
                }
            }
        }
        ledger
    }

    /// Add a file. Returns true if it was not already recorded.
    pub fn insert(&self, file_id: FileId) -> bool {
        let added = self.ids.insert(file_id);
        if added {
            self.save_to_disk();
        }
        added
    }

    pub fn contains(&self, file_id: &FileId) -> bool {
        self.ids.contains(file_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn save_to_disk(&self) {
        let Some(path) = self.persist_path.as_ref() else {
            return;
        };
        // snapshot and write under one lock
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut records: Vec<DeletedRecord> = self
            .ids
            .iter()
            .map(|id| DeletedRecord {
                file_id: id.key().clone(),
            })
            .collect();
        records.sort_by(|a, b| a.file_id.cmp(&b.file_id));
        if let Err(e) = jsonl::write_all(path, &records) {
            tracing::warn!(error = %e, path = %path.display(), "failed to persist deleted ledger");
        }
    }
}

// ── Backup catalog ────────────────────────────────────────────────────────────

/// What the initiator remembers about one backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub file_name: String,
    pub file_path: PathBuf,
    pub file_id: FileId,
    /// Length in bytes at backup time. Restore truncates to this.
    pub size: u64,
    pub chunk_count: u32,
    pub replication_degree: u8,
}

/// Files this peer initiated backups for, keyed by path.
#[derive(Clone, Default)]
pub struct BackupCatalog {
    entries: Arc<DashMap<PathBuf, CatalogEntry>>,
    persist_path: Arc<Option<PathBuf>>,
    write_lock: Arc<Mutex<()>>,
}

impl BackupCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_persistence(path: PathBuf) -> Self {
        let catalog = Self {
            entries: Arc::new(DashMap::new()),
            persist_path: Arc::new(Some(path)),
            write_lock: Arc::default(),
        };
        if let Some(path) = catalog.persist_path.as_ref() {
            match jsonl::read_all::<CatalogEntry>(path) {
                Ok(records) => {
                    for r in records {
                        catalog.entries.insert(r.file_path.clone(), r);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, path = %path.display(), "failed to load backup catalog")
                }
            }
        }
        catalog
    }

    /// Record a backup. A newer backup of the same path replaces the old one.
    pub fn record(&self, entry: CatalogEntry) -> Option<CatalogEntry> {
        let previous = self.entries.insert(entry.file_path.clone(), entry);
        self.save_to_disk();
        previous
    }

    /// Find by exact path, else by file name.
    pub fn lookup(&self, path: &Path) -> Option<CatalogEntry> {
        if let Some(entry) = self.entries.get(path) {
            return Some(entry.value().clone());
        }
        let name = path.file_name()?.to_str()?;
        let mut matches: Vec<CatalogEntry> = self
            .entries
            .iter()
            .filter(|e| e.file_name == name)
            .map(|e| e.value().clone())
            .collect();
        matches.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        matches.into_iter().next()
    }

    pub fn find_by_id(&self, file_id: &FileId) -> Option<CatalogEntry> {
        self.entries
            .iter()
            .find(|e| &e.file_id == file_id)
            .map(|e| e.value().clone())
    }

    /// Drop every record for a file id.
    pub fn remove_by_id(&self, file_id: &FileId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|_, e| &e.file_id != file_id);
        let removed = self.entries.len() != before;
        if removed {
            self.save_to_disk();
        }
        removed
    }

    /// All records, by path.
    pub fn entries(&self) -> Vec<CatalogEntry> {
        let mut out: Vec<CatalogEntry> = self.entries.iter().map(|e| e.value().clone()).collect();
        out.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        out
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn save_to_disk(&self) {
        let Some(path) = self.persist_path.as_ref() else {
            return;
        };
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = jsonl::write_all(path, &self.entries()) {
            tracing::warn!(error = %e, path = %path.display(), "failed to persist backup catalog");
        }
    }
}
