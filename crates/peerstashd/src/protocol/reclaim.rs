//! Reclaim: evict stored chunks to stay within capacity, and re-announce
//! chunks another peer evicted.

use std::sync::Arc;

use anyhow::Result;

use peerstash_core::{ChunkKey, MessageKind};

use crate::context::NodeContext;

/// An evicted chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eviction {
    pub key: ChunkKey,
    pub freed: u64,
}

/// Evict the stored chunk with the lowest declared degree and announce it.
/// None when nothing is stored.
pub async fn reclaim_one(ctx: &NodeContext) -> Result<Option<Eviction>> {
    let stored: Vec<ChunkKey> = ctx
        .store
        .stored_chunks()
        .into_iter()
        .map(|(key, _)| key)
        .collect();
    let Some(key) = ctx.index.pick_eviction(&stored) else {
        return Ok(None);
    };

    let freed = ctx.store.remove(&key)?;
    ctx.index.remove_holder(&key, ctx.peer_id);
    ctx.ignore.insert(key.clone(), ctx.protocol.ignore_ttl());

    let msg = ctx.message(
        key.file_id.clone(),
        MessageKind::Removed {
            chunk_no: key.chunk_no,
        },
    );
    ctx.send(&msg).await;

    tracing::info!(
        chunk = %key,
        freed,
        degree = ctx.index.desired_degree(&key).unwrap_or(0),
        "chunk evicted"
    );
    Ok(Some(Eviction { key, freed }))
}

/// Evict until used space is within capacity. Returns the evictions made.
pub async fn enforce_capacity(ctx: &NodeContext) -> Result<Vec<Eviction>> {
    let mut evicted = Vec::new();
    loop {
        let used = ctx.store.used_bytes();
        let capacity = ctx.capacity();
        if used <= capacity {
            break;
        }
        tracing::debug!(used, capacity, "over capacity");
        match reclaim_one(ctx).await? {
            Some(eviction) => evicted.push(eviction),
            None => break,
        }
    }
    Ok(evicted)
}

/// REMOVED from another peer: if the chunk is now under-replicated and we
/// hold it, re-announce it once, unless someone else does it first.
pub async fn handle_removed(ctx: Arc<NodeContext>, key: ChunkKey) {
    let mark = ctx.putchunk_watch.mark(&key);

    let Some(meta) = ctx.index.get(&key) else {
        return;
    };
    if !meta.is_under_replicated() || !ctx.store.has(&key) {
        return;
    }

    tokio::time::sleep(ctx.jitter()).await;
    if ctx.putchunk_watch.seen_since(&key, mark) {
        tracing::debug!(chunk = %key, "chunk already re-announced by a peer");
        return;
    }

    let body = match ctx.store.get(&key) {
        Ok(Some(body)) => body,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!(chunk = %key, error = %e, "failed to read chunk for re-announce");
            return;
        }
    };

    tracing::info!(
        chunk = %key,
        replicas = meta.replicas(),
        degree = meta.desired_degree,
        "re-announcing under-replicated chunk"
    );
    let msg = ctx.message(
        key.file_id.clone(),
        MessageKind::PutChunk {
            chunk_no: key.chunk_no,
            replication_degree: meta.desired_degree,
            body,
        },
    );
    ctx.send(&msg).await;
}
