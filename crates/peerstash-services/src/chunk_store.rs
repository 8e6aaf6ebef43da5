//! On-disk chunk store.
//!
//! Chunks live one file per chunk, grouped by file:
//!   <root>/<fileId>/<chunkNo>
//!
//! Writes go through a temp file and a rename, so a reader never sees a
//! half-written chunk. Anything under the root that is not a file-id
//! directory (metadata, restored files) is ignored.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bytes::Bytes;
use memmap2::Mmap;
use peerstash_core::{ChunkKey, FileId};

#[derive(Clone)]
pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    /// Create a store rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create chunk root: {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn has(&self, key: &ChunkKey) -> bool {
        self.chunk_path(key).is_file()
    }

    /// Read a stored chunk body (trailing zeros stripped).
    pub fn get(&self, key: &ChunkKey) -> Result<Option<Bytes>> {
        let path = self.chunk_path(key);
        if !path.is_file() {
            return Ok(None);
        }

        let file = fs::File::open(&path)
            .with_context(|| format!("failed to open chunk: {}", path.display()))?;
        let len = file
            .metadata()
            .with_context(|| format!("failed to stat chunk: {}", path.display()))?
            .len();
        if len == 0 {
            return Ok(Some(Bytes::new()));
        }

        // Safety: file is opened read-only and we don't mutate the mmap
        let mmap = unsafe {
            Mmap::map(&file).with_context(|| format!("failed to mmap chunk: {}", path.display()))?
        };
        Ok(Some(Bytes::copy_from_slice(&mmap)))
    }

    /// Store a chunk. Returns false if it was already present (nothing written).
    pub fn put(&self, key: &ChunkKey, data: &[u8]) -> Result<bool> {
        let path = self.chunk_path(key);
        if path.exists() {
            return Ok(false);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create file dir: {}", parent.display()))?;
        }

        let tmp_path = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp_path)
                .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;
            file.write_all(data).context("failed to write chunk data")?;
            file.sync_all().context("failed to sync chunk to disk")?;
        }

        fs::rename(&tmp_path, &path).with_context(|| {
            format!(
                "failed to rename {} to {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        tracing::trace!(chunk = %key, bytes = data.len(), "chunk stored");
        Ok(true)
    }

    /// Delete a chunk and, if it was the last one, its file directory.
    /// Returns the bytes freed (0 if the chunk was not stored).
    pub fn remove(&self, key: &ChunkKey) -> Result<u64> {
        let path = self.chunk_path(key);
        let len = match fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to stat chunk: {}", path.display()))
            }
        };
        fs::remove_file(&path)
            .with_context(|| format!("failed to remove chunk: {}", path.display()))?;

        let dir = self.file_dir(&key.file_id);
        let empty = fs::read_dir(&dir)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if empty {
            let _ = fs::remove_dir(&dir);
        }
        Ok(len)
    }

    /// Delete every chunk of a file. Returns the bytes freed.
    pub fn remove_file(&self, file_id: &FileId) -> Result<u64> {
        let dir = self.file_dir(file_id);
        if !dir.exists() {
            return Ok(0);
        }
        let freed = dir_size(&dir);
        fs::remove_dir_all(&dir)
            .with_context(|| format!("failed to remove file dir: {}", dir.display()))?;
        Ok(freed)
    }

    /// File ids with at least one directory under the root.
    pub fn stored_files(&self) -> Vec<FileId> {
        let mut files: Vec<FileId> = match fs::read_dir(&self.root) {
            Ok(entries) => entries
                .flatten()
                .filter(|e| e.path().is_dir())
                .filter_map(|e| e.file_name().to_str().and_then(|n| FileId::parse(n).ok()))
                .collect(),
            Err(_) => Vec::new(),
        };
        files.sort();
        files
    }

    /// Every stored chunk with its on-disk size, in key order.
    pub fn stored_chunks(&self) -> Vec<(ChunkKey, u64)> {
        let mut chunks = Vec::new();
        for file_id in self.stored_files() {
            let Ok(entries) = fs::read_dir(self.file_dir(&file_id)) else {
                continue;
            };
            for entry in entries.flatten() {
                let Some(chunk_no) = entry
                    .file_name()
                    .to_str()
                    .and_then(|n| n.parse::<u32>().ok())
                else {
                    continue;
                };
                let len = entry.metadata().map(|m| m.len()).unwrap_or(0);
                chunks.push((ChunkKey::new(file_id.clone(), chunk_no), len));
            }
        }
        chunks.sort();
        chunks
    }

    /// Chunk numbers of a file held locally.
    pub fn chunks_of(&self, file_id: &FileId) -> Vec<u32> {
        self.stored_chunks()
            .into_iter()
            .filter(|(key, _)| &key.file_id == file_id)
            .map(|(key, _)| key.chunk_no)
            .collect()
    }

    pub fn count(&self) -> usize {
        self.stored_chunks().len()
    }

    /// Sum of stored chunk sizes. This is the used capacity.
    pub fn used_bytes(&self) -> u64 {
        self.stored_chunks().iter().map(|(_, len)| len).sum()
    }

    fn file_dir(&self, file_id: &FileId) -> PathBuf {
        self.root.join(file_id.as_str())
    }

    fn chunk_path(&self, key: &ChunkKey) -> PathBuf {
        self.file_dir(&key.file_id).join(key.chunk_no.to_string())
    }
}

fn dir_size(dir: &Path) -> u64 {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .filter_map(|e| e.metadata().ok())
                .map(|m| m.len())
                .sum()
        })
        .unwrap_or(0)
}
