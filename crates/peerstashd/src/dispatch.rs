//! Receive loops: decode each datagram, update shared state, then hand it to
//! the protocol handler that reacts to peers.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use peerstash_core::{ChunkKey, Group, Message, MessageKind};

use crate::context::NodeContext;
use crate::protocol::{backup, delete, reclaim, restore};
use crate::transport::Inbound;

/// Whether a message goes on to the reactive stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bookkeeping {
    Continue,
    Drop,
}

/// One loop per group plus the direct path. The direct path only carries
/// CHUNK replies, so it is handled as the recovery group.
pub fn spawn_loops(
    ctx: Arc<NodeContext>,
    inbound: Inbound,
    shutdown: &broadcast::Sender<()>,
) -> Vec<JoinHandle<()>> {
    let Inbound {
        control,
        data,
        recovery,
        direct,
    } = inbound;
    vec![
        tokio::spawn(receive_loop(ctx.clone(), Group::Control, control, shutdown.subscribe())),
        tokio::spawn(receive_loop(ctx.clone(), Group::Data, data, shutdown.subscribe())),
        tokio::spawn(receive_loop(ctx.clone(), Group::Recovery, recovery, shutdown.subscribe())),
        tokio::spawn(receive_loop(ctx, Group::Recovery, direct, shutdown.subscribe())),
    ]
}

async fn receive_loop(
    ctx: Arc<NodeContext>,
    group: Group,
    mut rx: mpsc::Receiver<Bytes>,
    mut shutdown: broadcast::Receiver<()>,
) {
    tracing::debug!(group = group.name(), "receive loop started");
    loop {
        tokio::select! {
            datagram = rx.recv() => match datagram {
                Some(datagram) => handle_datagram(&ctx, group, &datagram),
                None => break,
            },
            _ = shutdown.recv() => break,
        }
    }
    tracing::debug!(group = group.name(), "receive loop stopped");
}

/// Process one datagram received on `group`.
pub fn handle_datagram(ctx: &Arc<NodeContext>, group: Group, datagram: &[u8]) {
    let msg = match Message::decode(datagram) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::debug!(group = group.name(), len = datagram.len(), error = %e, "dropping malformed datagram");
            return;
        }
    };

    let kind = msg.message_type();
    if kind.group() != group {
        tracing::debug!(kind = %kind, group = group.name(), "message on wrong group, dropping");
        return;
    }

    if bookkeeping(ctx, &msg) == Bookkeeping::Drop {
        return;
    }
    if msg.sender_id == ctx.peer_id {
        return;
    }
    react(ctx, msg);
}

/// State updates every message triggers, self-sent ones included.
fn bookkeeping(ctx: &NodeContext, msg: &Message) -> Bookkeeping {
    let key = |chunk_no: u32| ChunkKey::new(msg.file_id.clone(), chunk_no);

    match &msg.kind {
        MessageKind::PutChunk {
            chunk_no,
            replication_degree,
            ..
        } => {
            if ctx.deleted.contains(&msg.file_id) {
                tracing::debug!(file_id = msg.file_id.short(), "PUTCHUNK for deleted file, dropping");
                return Bookkeeping::Drop;
            }
            let key = key(*chunk_no);
            ctx.index.observe_putchunk(&key, *replication_degree);
            ctx.putchunk_watch.note(&key);
        }
        MessageKind::Stored { chunk_no } => {
            if ctx.deleted.contains(&msg.file_id) {
                return Bookkeeping::Drop;
            }
            let replicas = ctx.index.add_holder(&key(*chunk_no), msg.sender_id);
            tracing::trace!(chunk = %key(*chunk_no), peer = msg.sender_id, replicas, "holder added");
        }
        MessageKind::Removed { chunk_no } => {
            let key = key(*chunk_no);
            ctx.index.remove_holder(&key, msg.sender_id);
            if msg.sender_id == ctx.peer_id {
                ctx.ignore.insert(key, ctx.protocol.ignore_ttl());
            }
        }
        MessageKind::GetChunk { chunk_no } => ctx.answered.reset(&key(*chunk_no)),
        MessageKind::Chunk { chunk_no, body } => {
            let key = key(*chunk_no);
            if ctx.restores.is_active(&msg.file_id) {
                if ctx.restores.insert(&key, body.clone()) {
                    tracing::debug!(chunk = %key, peer = msg.sender_id, "chunk received");
                }
            } else {
                ctx.answered.mark(&key);
            }
        }
        MessageKind::Delete | MessageKind::GetDeleted => {}
    }
    Bookkeeping::Continue
}

/// Hand a peer's message to its protocol handler. Handlers sleep or touch
/// disk, so each runs on its own task.
fn react(ctx: &Arc<NodeContext>, msg: Message) {
    let ctx = ctx.clone();
    let sender = msg.sender_id;
    let file_id = msg.file_id;
    match msg.kind {
        MessageKind::PutChunk {
            chunk_no,
            replication_degree,
            body,
        } => {
            let key = ChunkKey::new(file_id, chunk_no);
            tokio::spawn(backup::handle_putchunk(ctx, key, replication_degree, body));
        }
        MessageKind::GetChunk { chunk_no } => {
            let key = ChunkKey::new(file_id, chunk_no);
            tokio::spawn(restore::serve_getchunk(ctx, key, sender));
        }
        MessageKind::Delete => {
            tokio::spawn(delete::handle_delete(ctx, file_id));
        }
        MessageKind::GetDeleted => {
            tokio::spawn(delete::handle_get_deleted(ctx, file_id));
        }
        MessageKind::Removed { chunk_no } => {
            let key = ChunkKey::new(file_id, chunk_no);
            tokio::spawn(reclaim::handle_removed(ctx, key));
        }
        // holder counts were updated in bookkeeping
        MessageKind::Stored { chunk_no } => {
            tracing::trace!(file_id = file_id.short(), chunk_no, peer = sender, "STORED");
        }
        MessageKind::Chunk { chunk_no, .. } => {
            tracing::trace!(file_id = file_id.short(), chunk_no, peer = sender, "CHUNK");
        }
    }
}
