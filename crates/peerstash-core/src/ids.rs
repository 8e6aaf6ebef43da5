//! Identifiers shared by every layer: peers, files and chunks.

use std::fmt;
use std::path::Path;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::wire::WireError;

/// Integer identity of a peer. Unique per population.
pub type PeerId = u32;

/// SHA-256 of `file name + modification time`, as 64 lowercase hex chars.
///
/// The namespace key for every chunk of a file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileId(String);

impl FileId {
    /// Derive the id from a file name and its mtime in milliseconds.
    pub fn derive(file_name: &str, modified_millis: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(file_name.as_bytes());
        hasher.update(modified_millis.to_string().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Derive the id of a file on disk from its name and mtime.
    pub fn for_path(path: &Path) -> std::io::Result<Self> {
        let name = file_name(path);
        let modified = std::fs::metadata(path)?.modified()?;
        let millis = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Ok(Self::derive(&name, millis))
    }

    /// Parse a wire/disk representation. Hex case is normalized.
    pub fn parse(s: &str) -> Result<Self, WireError> {
        if s.len() != 64 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(WireError::InvalidFileId(s.to_string()));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for FileId {
    type Error = WireError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FileId> for String {
    fn from(id: FileId) -> String {
        id.0
    }
}

/// Unique id of a chunk: `(fileId, chunkNo)`.
///
/// Ordering is by file id then chunk number, which makes eviction
/// tie-breaks deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkKey {
    pub file_id: FileId,
    pub chunk_no: u32,
}

impl ChunkKey {
    pub fn new(file_id: FileId, chunk_no: u32) -> Self {
        Self { file_id, chunk_no }
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file_id.short(), self.chunk_no)
    }
}

/// Final path component as a string, or "unknown".
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string()
}
