//! Snapshot of what this peer backed up, what it stores, and how full it is.

use peerstash_api::{BackedUpFile, ChunkReplication, StateReport, StoredChunk};
use peerstash_core::ChunkKey;

use crate::context::NodeContext;

pub fn build(ctx: &NodeContext) -> StateReport {
    let capacity = ctx.capacity();
    let used = ctx.store.used_bytes();

    let backed_up = ctx
        .catalog
        .entries()
        .into_iter()
        .map(|entry| {
            let chunks = (0..entry.chunk_count)
                .map(|chunk_no| ChunkReplication {
                    chunk_no,
                    observed: ctx
                        .index
                        .replicas(&ChunkKey::new(entry.file_id.clone(), chunk_no)),
                })
                .collect();
            BackedUpFile {
                path: entry.file_path.display().to_string(),
                file_id: entry.file_id.to_string(),
                desired_degree: entry.replication_degree,
                chunks,
            }
        })
        .collect();

    let stored = ctx
        .store
        .stored_chunks()
        .into_iter()
        .map(|(key, size)| StoredChunk {
            desired_degree: ctx.index.desired_degree(&key).unwrap_or(0),
            observed: ctx.index.replicas(&key),
            file_id: key.file_id.to_string(),
            chunk_no: key.chunk_no,
            size,
        })
        .collect();

    StateReport {
        peer_id: ctx.peer_id,
        version: ctx.version.to_string(),
        capacity,
        used,
        free: capacity.saturating_sub(used),
        backed_up,
        stored,
        deleted_files: ctx.deleted.len(),
    }
}
