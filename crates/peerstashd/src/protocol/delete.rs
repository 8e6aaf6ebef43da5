//! Delete and deleted-ledger reconciliation.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinSet;

use peerstash_core::{FileId, MessageKind};

use super::retry::Backoff;
use crate::context::NodeContext;
use crate::error::OperationError;

/// Result of checking locally stored files against peers' ledgers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub checked: usize,
    pub purged: Vec<FileId>,
}

/// Announce deletion of a file this peer backed up.
pub async fn delete(ctx: &NodeContext, path: &Path) -> Result<FileId> {
    let file_id = match ctx.catalog.lookup(path) {
        Some(entry) => entry.file_id,
        None => {
            if !path.exists() {
                return Err(OperationError::UnknownFile(path.to_path_buf()).into());
            }
            FileId::for_path(path).with_context(|| format!("failed to stat {}", path.display()))?
        }
    };

    let msg = ctx.message(file_id.clone(), MessageKind::Delete);
    for _ in 0..ctx.protocol.delete_repeats {
        ctx.send(&msg).await;
    }

    ctx.catalog.remove_by_id(&file_id);
    let purged = purge_state(ctx, &file_id);
    ctx.store.remove_file(&file_id)?;
    tracing::info!(
        file_id = file_id.short(),
        repeats = ctx.protocol.delete_repeats,
        metadata_purged = purged,
        "delete announced"
    );
    Ok(file_id)
}

/// Drop everything kept in memory about a file. Returns the number of
/// index entries removed.
fn purge_state(ctx: &NodeContext, file_id: &FileId) -> usize {
    ctx.putchunk_watch.purge_file(file_id);
    ctx.answered.purge_file(file_id);
    ctx.index.purge_file(file_id)
}

/// DELETE from another peer.
pub async fn handle_delete(ctx: Arc<NodeContext>, file_id: FileId) {
    let newly = ctx.deleted.insert(file_id.clone());
    let purged = purge_state(&ctx, &file_id);
    match ctx.store.remove_file(&file_id) {
        Ok(freed) => {
            if newly || freed > 0 {
                tracing::info!(file_id = file_id.short(), freed, metadata_purged = purged, "file deleted");
            }
        }
        Err(e) => tracing::warn!(file_id = file_id.short(), error = %e, "failed to delete file chunks"),
    }
}

/// GET_DELETED from another peer: confirm with one DELETE if we know.
pub async fn handle_get_deleted(ctx: Arc<NodeContext>, file_id: FileId) {
    if !ctx.deleted.contains(&file_id) {
        return;
    }
    tracing::debug!(file_id = file_id.short(), "confirming deletion to peer");
    let msg = ctx.message(file_id, MessageKind::Delete);
    ctx.send(&msg).await;
}

/// Ask the population about every file with chunks stored here.
pub async fn reconcile_stored(ctx: Arc<NodeContext>) -> ReconcileReport {
    let files = ctx.store.stored_files();
    let mut checks = JoinSet::new();
    for file_id in files.iter().cloned() {
        let ctx = ctx.clone();
        checks.spawn(async move {
            let deleted = validate_file(&ctx, &file_id).await;
            (file_id, deleted)
        });
    }

    let mut report = ReconcileReport {
        checked: files.len(),
        purged: Vec::new(),
    };
    while let Some(result) = checks.join_next().await {
        match result {
            Ok((file_id, true)) => report.purged.push(file_id),
            Ok((_, false)) => {}
            Err(e) => tracing::warn!(error = %e, "deleted-file check failed"),
        }
    }
    report.purged.sort();

    tracing::info!(checked = report.checked, purged = report.purged.len(), "deleted-file reconciliation done");
    report
}

/// GET_DELETED with backoff until the ledger learns of the deletion or the
/// attempts run out. True if the file turned out deleted.
async fn validate_file(ctx: &NodeContext, file_id: &FileId) -> bool {
    let msg = ctx.message(file_id.clone(), MessageKind::GetDeleted);
    let retries = ctx.protocol.validate_attempts.saturating_sub(1);
    let mut backoff = Backoff::new(ctx.protocol.validate_delay(), retries);
    loop {
        if ctx.deleted.contains(file_id) {
            return true;
        }
        ctx.send(&msg).await;
        tokio::time::sleep(backoff.delay()).await;
        if ctx.deleted.contains(file_id) {
            // purge ran in the DELETE handler; make sure nothing is left
            if let Err(e) = ctx.store.remove_file(file_id) {
                tracing::warn!(file_id = file_id.short(), error = %e, "failed to delete file chunks");
            }
            return true;
        }
        if !backoff.advance() {
            tracing::debug!(file_id = file_id.short(), "no deletion reported, keeping file");
            return false;
        }
    }
}
