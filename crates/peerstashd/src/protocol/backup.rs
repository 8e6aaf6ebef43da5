//! Backup: the initiator's windowed sender and the holders' receive path.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};

use peerstash_core::chunking;
use peerstash_core::ids::file_name;
use peerstash_core::{ChunkKey, FileId, MessageKind};
use peerstash_services::CatalogEntry;

use super::reclaim;
use super::retry::Backoff;
use crate::context::NodeContext;
use crate::error::OperationError;

/// Outcome of one backup job once every chunk is confirmed or given up on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupReport {
    pub file_id: FileId,
    pub chunk_count: u32,
    pub confirmed: Vec<u32>,
    pub under_replicated: Vec<u32>,
}

impl BackupReport {
    pub fn is_complete(&self) -> bool {
        self.under_replicated.is_empty() && self.confirmed.len() == self.chunk_count as usize
    }
}

/// A running backup job.
pub struct BackupHandle {
    pub file_id: FileId,
    pub chunk_count: u32,
    task: JoinHandle<BackupReport>,
}

impl BackupHandle {
    /// Wait for the job to finish.
    pub async fn wait(self) -> Result<BackupReport> {
        self.task.await.context("backup job panicked")
    }
}

/// Read, split and record the file, then start sending its chunks.
pub async fn start(ctx: Arc<NodeContext>, path: &Path, degree: u8) -> Result<BackupHandle> {
    if degree == 0 {
        return Err(OperationError::InvalidDegree.into());
    }

    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let file_id = FileId::for_path(path)
        .with_context(|| format!("failed to stat {}", path.display()))?;
    let data = Bytes::from(data);
    let chunks = chunking::split(&data, ctx.chunk_size());
    let chunk_count = chunks.len() as u32;

    ctx.catalog.record(CatalogEntry {
        file_name: file_name(path),
        file_path: path.to_path_buf(),
        file_id: file_id.clone(),
        size: data.len() as u64,
        chunk_count,
        replication_degree: degree,
    });

    tracing::info!(
        file_id = file_id.short(),
        path = %path.display(),
        bytes = data.len(),
        chunks = chunk_count,
        degree,
        "backup started"
    );

    let task = tokio::spawn(run_job(ctx, file_id.clone(), degree, chunks));
    Ok(BackupHandle {
        file_id,
        chunk_count,
        task,
    })
}

/// Send every chunk through a window of `window_size` in-flight PUTCHUNKs.
/// The window belongs to this job alone.
async fn run_job(
    ctx: Arc<NodeContext>,
    file_id: FileId,
    degree: u8,
    chunks: Vec<Bytes>,
) -> BackupReport {
    let chunk_count = chunks.len() as u32;
    let window = Arc::new(Semaphore::new(ctx.protocol.window_size));
    let mut jobs = JoinSet::new();

    for (chunk_no, body) in chunks.into_iter().enumerate() {
        let permit = match window.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => break,
        };
        let key = ChunkKey::new(file_id.clone(), chunk_no as u32);
        let ctx = ctx.clone();
        jobs.spawn(async move {
            let _permit = permit;
            let confirmed = send_chunk(&ctx, &key, degree, body).await;
            (key.chunk_no, confirmed)
        });
    }

    let mut confirmed = Vec::new();
    let mut under_replicated = Vec::new();
    while let Some(result) = jobs.join_next().await {
        match result {
            Ok((chunk_no, true)) => confirmed.push(chunk_no),
            Ok((chunk_no, false)) => under_replicated.push(chunk_no),
            Err(e) => tracing::warn!(error = %e, "chunk sender task failed"),
        }
    }
    confirmed.sort_unstable();
    under_replicated.sort_unstable();

    if under_replicated.is_empty() {
        tracing::info!(file_id = file_id.short(), chunks = chunk_count, "backup confirmed");
    } else {
        tracing::warn!(
            file_id = file_id.short(),
            under_replicated = ?under_replicated,
            "backup finished under-replicated"
        );
    }

    BackupReport {
        file_id,
        chunk_count,
        confirmed,
        under_replicated,
    }
}

/// PUTCHUNK with confirmation timer: wait, check holders, resend with a
/// doubled timeout while retries remain. True once `holders >= degree`.
async fn send_chunk(ctx: &NodeContext, key: &ChunkKey, degree: u8, body: Bytes) -> bool {
    ctx.index.observe_putchunk(key, degree);
    let msg = ctx.message(
        key.file_id.clone(),
        MessageKind::PutChunk {
            chunk_no: key.chunk_no,
            replication_degree: degree,
            body,
        },
    );

    let mut backoff = Backoff::new(ctx.protocol.base_timeout(), ctx.protocol.backup_retries);
    loop {
        ctx.send(&msg).await;
        tokio::time::sleep(backoff.delay()).await;

        let replicas = ctx.index.replicas(key);
        if replicas >= degree as usize {
            tracing::debug!(chunk = %key, replicas, "chunk confirmed");
            return true;
        }
        if !backoff.advance() {
            tracing::warn!(chunk = %key, replicas, degree, "retries exhausted, chunk under-replicated");
            return false;
        }
        tracing::debug!(
            chunk = %key,
            replicas,
            degree,
            timeout_ms = backoff.delay().as_millis() as u64,
            "resending PUTCHUNK"
        );
    }
}

/// PUTCHUNK from another peer.
pub async fn handle_putchunk(ctx: Arc<NodeContext>, key: ChunkKey, degree: u8, body: Bytes) {
    if ctx.ignore.contains(&key) {
        tracing::debug!(chunk = %key, "chunk on ignore-list, not storing");
        return;
    }

    tokio::time::sleep(ctx.jitter()).await;

    if ctx.store.has(&key) {
        ctx.index.add_holder(&key, ctx.peer_id);
        announce_stored(&ctx, &key).await;
        return;
    }
    if ctx.ignore.contains(&key) || ctx.deleted.contains(&key.file_id) {
        return;
    }
    let replicas = ctx.index.replicas(&key);
    if replicas >= degree as usize {
        tracing::debug!(chunk = %key, replicas, degree, "enough replicas, not storing");
        return;
    }

    let trimmed = chunking::trim_trailing_zeros(&body);
    match ctx.store.put(&key, trimmed) {
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(chunk = %key, error = %e, "failed to store chunk");
            return;
        }
    }
    ctx.index.add_holder(&key, ctx.peer_id);
    tracing::debug!(chunk = %key, bytes = trimmed.len(), "chunk stored");
    announce_stored(&ctx, &key).await;

    if let Err(e) = reclaim::enforce_capacity(&ctx).await {
        tracing::warn!(error = %e, "capacity enforcement failed");
    }
}

async fn announce_stored(ctx: &NodeContext, key: &ChunkKey) {
    let msg = ctx.message(
        key.file_id.clone(),
        MessageKind::Stored {
            chunk_no: key.chunk_no,
        },
    );
    ctx.send(&msg).await;
}
