//! Peer state snapshot, served as JSON and rendered as text.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateReport {
    pub peer_id: u32,
    pub version: String,
    pub capacity: u64,
    pub used: u64,
    pub free: u64,
    pub backed_up: Vec<BackedUpFile>,
    pub stored: Vec<StoredChunk>,
    pub deleted_files: usize,
}

/// A file this peer initiated a backup of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackedUpFile {
    pub path: String,
    pub file_id: String,
    pub desired_degree: u8,
    pub chunks: Vec<ChunkReplication>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkReplication {
    pub chunk_no: u32,
    pub observed: usize,
}

/// A chunk held on this peer's disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredChunk {
    pub file_id: String,
    pub chunk_no: u32,
    pub size: u64,
    pub desired_degree: u8,
    pub observed: usize,
}

impl fmt::Display for StateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "peer {} (protocol {})", self.peer_id, self.version)?;
        writeln!(
            f,
            "storage: {} used / {} capacity ({} free)",
            self.used, self.capacity, self.free
        )?;

        writeln!(f, "backed up files: {}", self.backed_up.len())?;
        for file in &self.backed_up {
            writeln!(
                f,
                "  {} [{}] degree {}",
                file.path, file.file_id, file.desired_degree
            )?;
            for chunk in &file.chunks {
                writeln!(f, "    chunk {}: {} replicas", chunk.chunk_no, chunk.observed)?;
            }
        }

        writeln!(f, "stored chunks: {}", self.stored.len())?;
        for chunk in &self.stored {
            writeln!(
                f,
                "  {}:{} {} bytes, degree {}/{}",
                chunk.file_id, chunk.chunk_no, chunk.size, chunk.observed, chunk.desired_degree
            )?;
        }

        write!(f, "deleted files known: {}", self.deleted_files)
    }
}
