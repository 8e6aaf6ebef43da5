//! Restore: gather a file's chunks back from the holders and reassemble it.
//!
//! The initiator multicasts GETCHUNK for every missing chunk each round.
//! Holders reply with CHUNK over the direct path, falling back to the
//! recovery group when the initiator cannot be reached.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use peerstash_core::chunking;
use peerstash_core::ids::file_name;
use peerstash_core::{ChunkKey, FileId, Group, MessageKind, PeerId};

use crate::context::NodeContext;
use crate::error::OperationError;

/// What a restore is working from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreTarget {
    pub file_id: FileId,
    pub file_name: String,
    pub size: u64,
    pub chunk_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    Completed { path: PathBuf, bytes: u64 },
    Incomplete { missing: Vec<u32> },
    Cancelled,
}

/// A running restore. Dropping the handle does not stop it.
pub struct RestoreHandle {
    pub target: RestoreTarget,
    cancel: Arc<Notify>,
    task: JoinHandle<Result<RestoreOutcome>>,
}

impl RestoreHandle {
    pub fn cancel(&self) {
        self.cancel.notify_one();
    }

    pub async fn wait(self) -> Result<RestoreOutcome> {
        self.task.await.context("restore task panicked")?
    }
}

/// Catalog record first; otherwise derive id and size from the local file.
pub fn resolve(ctx: &NodeContext, path: &Path) -> Result<RestoreTarget> {
    if let Some(entry) = ctx.catalog.lookup(path) {
        return Ok(RestoreTarget {
            chunk_count: chunking::chunk_count(entry.size, ctx.chunk_size()),
            file_id: entry.file_id,
            file_name: entry.file_name,
            size: entry.size,
        });
    }

    let meta = std::fs::metadata(path)
        .map_err(|_| OperationError::UnknownFile(path.to_path_buf()))?;
    let file_id = FileId::for_path(path)
        .with_context(|| format!("failed to stat {}", path.display()))?;
    Ok(RestoreTarget {
        file_id,
        file_name: file_name(path),
        size: meta.len(),
        chunk_count: chunking::chunk_count(meta.len(), ctx.chunk_size()),
    })
}

pub fn start(ctx: Arc<NodeContext>, path: &Path) -> Result<RestoreHandle> {
    let target = resolve(&ctx, path)?;
    if !ctx.restores.begin(&target.file_id) {
        return Err(OperationError::RestoreInProgress(target.file_id).into());
    }

    tracing::info!(
        file_id = target.file_id.short(),
        chunks = target.chunk_count,
        bytes = target.size,
        "restore started"
    );

    let cancel = Arc::new(Notify::new());
    let task = tokio::spawn(run(ctx, target.clone(), cancel.clone()));
    Ok(RestoreHandle {
        target,
        cancel,
        task,
    })
}

async fn run(
    ctx: Arc<NodeContext>,
    target: RestoreTarget,
    cancel: Arc<Notify>,
) -> Result<RestoreOutcome> {
    let file_id = &target.file_id;

    for round in 0..ctx.protocol.restore_max_rounds {
        let missing = ctx.restores.missing(file_id, target.chunk_count);
        if missing.is_empty() {
            break;
        }
        tracing::debug!(file_id = file_id.short(), round, missing = missing.len(), "requesting chunks");
        for chunk_no in missing {
            let msg = ctx.message(file_id.clone(), MessageKind::GetChunk { chunk_no });
            ctx.send(&msg).await;
        }

        tokio::select! {
            _ = tokio::time::sleep(ctx.protocol.restore_interval()) => {}
            _ = cancel.notified() => {
                ctx.restores.finish(file_id);
                tracing::info!(file_id = file_id.short(), "restore cancelled");
                return Ok(RestoreOutcome::Cancelled);
            }
        }
    }

    let chunks = ctx.restores.finish(file_id).unwrap_or_default();
    let missing: Vec<u32> = (0..target.chunk_count)
        .filter(|n| !chunks.contains_key(n))
        .collect();
    if !missing.is_empty() {
        tracing::warn!(file_id = file_id.short(), missing = ?missing, "restore gave up");
        return Ok(RestoreOutcome::Incomplete { missing });
    }

    let data = chunking::reassemble(
        chunks.values().map(|b| b.as_ref()),
        ctx.chunk_size(),
        target.size,
    );

    tokio::fs::create_dir_all(&ctx.restore_dir)
        .await
        .with_context(|| format!("failed to create {}", ctx.restore_dir.display()))?;
    let out = ctx.restore_dir.join(&target.file_name);
    tokio::fs::write(&out, &data)
        .await
        .with_context(|| format!("failed to write {}", out.display()))?;

    tracing::info!(file_id = file_id.short(), path = %out.display(), bytes = data.len(), "restore complete");
    Ok(RestoreOutcome::Completed {
        path: out,
        bytes: data.len() as u64,
    })
}

/// GETCHUNK from another peer: answer with CHUNK if we hold it and nobody
/// answered first.
pub async fn serve_getchunk(ctx: Arc<NodeContext>, key: ChunkKey, requester: PeerId) {
    if !ctx.store.has(&key) {
        return;
    }

    tokio::time::sleep(ctx.jitter()).await;
    if ctx.answered.is_answered(&key) {
        tracing::debug!(chunk = %key, "already answered");
        return;
    }

    let body = match ctx.store.get(&key) {
        Ok(Some(body)) => body,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!(chunk = %key, error = %e, "failed to read chunk");
            return;
        }
    };
    let datagram = ctx
        .message(
            key.file_id.clone(),
            MessageKind::Chunk {
                chunk_no: key.chunk_no,
                body,
            },
        )
        .encode();

    if ctx.transport.send_direct(requester, datagram.clone()).await.is_ok() {
        tracing::debug!(chunk = %key, peer = requester, "chunk sent direct");
        return;
    }
    tokio::time::sleep(ctx.protocol.direct_retry_delay()).await;
    match ctx.transport.send_direct(requester, datagram.clone()).await {
        Ok(()) => tracing::debug!(chunk = %key, peer = requester, "chunk sent direct on retry"),
        Err(e) => {
            if ctx.answered.is_answered(&key) {
                tracing::debug!(chunk = %key, "answered by another holder while direct path failed");
                return;
            }
            tracing::debug!(chunk = %key, peer = requester, error = %e, "direct path failed, using multicast");
            if let Err(e) = ctx.transport.send(Group::Recovery, datagram).await {
                tracing::warn!(chunk = %key, error = %e, "failed to send chunk");
            }
        }
    }
}
