//! The peer node: owns the shared context, the receive loops and the
//! persistence ticker, and exposes the control-plane operations.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use peerstash_api::{ControlFuture, PeerControl, StateReport};
use peerstash_core::config::{PeerstashConfig, ProtocolConfig};
use peerstash_core::{FileId, PeerId};

use crate::context::NodeContext;
use crate::dispatch;
use crate::protocol::backup::{self, BackupHandle};
use crate::protocol::delete::{self, ReconcileReport};
use crate::protocol::reclaim::{self, Eviction};
use crate::protocol::restore::{self, RestoreHandle};
use crate::state;
use crate::transport::{Inbound, Transport};

/// Everything a node needs besides its transport.
#[derive(Debug, Clone)]
pub struct NodeOptions {
    pub peer_id: PeerId,
    pub protocol: ProtocolConfig,
    pub root: PathBuf,
    pub restore_dir: PathBuf,
    pub capacity: u64,
}

impl NodeOptions {
    pub fn from_config(config: &PeerstashConfig) -> Result<Self> {
        let peer_id = config.identity.peer_id;
        Ok(Self {
            peer_id,
            protocol: config.protocol.clone(),
            root: config.storage.root_for(peer_id),
            restore_dir: config.storage.restore_dir_for(peer_id),
            capacity: config
                .storage
                .capacity_bytes()
                .context("invalid storage capacity")?,
        })
    }
}

pub struct PeerNode {
    ctx: Arc<NodeContext>,
    shutdown: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PeerNode {
    /// Open local state and start the receive loops.
    pub fn start(
        options: NodeOptions,
        transport: Arc<dyn Transport>,
        inbound: Inbound,
    ) -> Result<Arc<Self>> {
        let ctx = Arc::new(
            NodeContext::open(
                options.peer_id,
                options.protocol,
                transport,
                options.root.clone(),
                options.restore_dir,
                options.capacity,
            )
            .with_context(|| format!("failed to open store at {}", options.root.display()))?,
        );

        let (shutdown, _) = broadcast::channel::<()>(1);
        let mut tasks = dispatch::spawn_loops(ctx.clone(), inbound, &shutdown);
        tasks.push(tokio::spawn(persist_loop(ctx.clone(), shutdown.subscribe())));

        tracing::info!(
            peer_id = ctx.peer_id,
            version = %ctx.version,
            root = %options.root.display(),
            capacity = ctx.capacity(),
            stored_chunks = ctx.store.count(),
            "peer node started"
        );

        Ok(Arc::new(Self {
            ctx,
            shutdown,
            tasks: Mutex::new(tasks),
        }))
    }

    pub fn peer_id(&self) -> PeerId {
        self.ctx.peer_id
    }

    pub fn context(&self) -> &Arc<NodeContext> {
        &self.ctx
    }

    pub async fn backup(&self, path: &Path, replication_degree: u8) -> Result<BackupHandle> {
        backup::start(self.ctx.clone(), path, replication_degree).await
    }

    pub fn restore(&self, path: &Path) -> Result<RestoreHandle> {
        restore::start(self.ctx.clone(), path)
    }

    pub async fn delete(&self, path: &Path) -> Result<FileId> {
        delete::delete(&self.ctx, path).await
    }

    /// Evict one chunk.
    pub async fn reclaim(&self) -> Result<Option<Eviction>> {
        reclaim::reclaim_one(&self.ctx).await
    }

    /// Change capacity and evict until within it.
    pub async fn set_capacity(&self, bytes: u64) -> Result<Vec<Eviction>> {
        self.ctx.set_capacity(bytes);
        tracing::info!(capacity = bytes, "capacity changed");
        reclaim::enforce_capacity(&self.ctx).await
    }

    /// Ask peers whether any file stored here was deleted while we were away.
    pub async fn reconcile_deleted(&self) -> ReconcileReport {
        delete::reconcile_stored(self.ctx.clone()).await
    }

    pub fn state(&self) -> StateReport {
        state::build(&self.ctx)
    }

    pub fn flush(&self) -> Result<()> {
        self.ctx.index.flush().context("failed to flush metadata index")
    }

    /// Stop the loops and flush the index.
    pub async fn shutdown(&self) -> Result<()> {
        let _ = self.shutdown.send(());
        let tasks: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "node task failed");
            }
        }
        self.flush()?;
        tracing::info!(peer_id = self.ctx.peer_id, "peer node stopped");
        Ok(())
    }
}

async fn persist_loop(ctx: Arc<NodeContext>, mut shutdown: broadcast::Receiver<()>) {
    let mut interval = tokio::time::interval(ctx.protocol.persist_interval());
    interval.tick().await;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = ctx.index.flush() {
                    tracing::warn!(error = %e, "periodic index flush failed");
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

impl PeerControl for PeerNode {
    fn backup(&self, path: PathBuf, replication_degree: u8) -> ControlFuture<'_, String> {
        Box::pin(async move {
            let handle = PeerNode::backup(self, &path, replication_degree).await?;
            Ok(format!(
                "backup of {} started: {} chunks, degree {}, file id {}",
                path.display(),
                handle.chunk_count,
                replication_degree,
                handle.file_id.short()
            ))
        })
    }

    fn restore(&self, path: PathBuf) -> ControlFuture<'_, String> {
        Box::pin(async move {
            let handle = PeerNode::restore(self, &path)?;
            let target = handle.target.clone();
            tokio::spawn(async move {
                match handle.wait().await {
                    Ok(outcome) => tracing::debug!(file_id = target.file_id.short(), ?outcome, "restore finished"),
                    Err(e) => tracing::warn!(file_id = target.file_id.short(), error = %e, "restore failed"),
                }
            });
            Ok(format!(
                "restore of {} started: {} chunks into {}",
                target.file_name,
                target.chunk_count,
                self.ctx.restore_dir.display()
            ))
        })
    }

    fn delete(&self, path: PathBuf) -> ControlFuture<'_, String> {
        Box::pin(async move {
            let file_id = PeerNode::delete(self, &path).await?;
            Ok(format!("delete of {} announced (file id {})", path.display(), file_id.short()))
        })
    }

    fn reclaim(&self) -> ControlFuture<'_, String> {
        Box::pin(async move {
            Ok(match PeerNode::reclaim(self).await? {
                Some(eviction) => format!("evicted chunk {} ({} bytes)", eviction.key, eviction.freed),
                None => "nothing stored, nothing to reclaim".to_string(),
            })
        })
    }

    fn set_capacity(&self, bytes: u64) -> ControlFuture<'_, String> {
        Box::pin(async move {
            let evicted = PeerNode::set_capacity(self, bytes).await?;
            let freed: u64 = evicted.iter().map(|e| e.freed).sum();
            Ok(format!(
                "capacity set to {} bytes: evicted {} chunks ({} bytes)",
                bytes,
                evicted.len(),
                freed
            ))
        })
    }

    fn state(&self) -> StateReport {
        PeerNode::state(self)
    }
}
