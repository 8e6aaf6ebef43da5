//! Shared node state handed to every loop and handler.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rand::Rng;

use peerstash_core::config::ProtocolConfig;
use peerstash_core::{FileId, Message, MessageKind, PeerId, Version};
use peerstash_services::{
    AnsweredChunks, BackupCatalog, ChunkStore, DeletedLedger, IgnoreList, MetadataIndex,
    PutchunkWatch, RestoreAccumulator,
};

use crate::transport::Transport;

pub struct NodeContext {
    pub peer_id: PeerId,
    pub version: Version,
    pub protocol: ProtocolConfig,
    pub transport: Arc<dyn Transport>,
    pub store: ChunkStore,
    pub index: MetadataIndex,
    pub deleted: DeletedLedger,
    pub catalog: BackupCatalog,
    pub restores: RestoreAccumulator,
    pub answered: AnsweredChunks,
    pub ignore: IgnoreList,
    pub putchunk_watch: PutchunkWatch,
    pub restore_dir: PathBuf,
    capacity: AtomicU64,
}

impl NodeContext {
    /// Build the context over `root`, loading persisted state from `<root>/.meta`.
    pub fn open(
        peer_id: PeerId,
        protocol: ProtocolConfig,
        transport: Arc<dyn Transport>,
        root: PathBuf,
        restore_dir: PathBuf,
        capacity: u64,
    ) -> Result<Self> {
        let store = ChunkStore::new(&root)?;
        let meta = root.join(".meta");
        Ok(Self {
            peer_id,
            version: protocol.version,
            transport,
            store,
            index: MetadataIndex::with_persistence(meta.join("index.jsonl")),
            deleted: DeletedLedger::with_persistence(meta.join("deleted.jsonl")),
            catalog: BackupCatalog::with_persistence(meta.join("catalog.jsonl")),
            restores: RestoreAccumulator::new(),
            answered: AnsweredChunks::new(),
            ignore: IgnoreList::new(),
            putchunk_watch: PutchunkWatch::new(),
            restore_dir,
            capacity: AtomicU64::new(capacity),
            protocol,
        })
    }

    pub fn capacity(&self) -> u64 {
        self.capacity.load(Ordering::Relaxed)
    }

    pub fn set_capacity(&self, bytes: u64) {
        self.capacity.store(bytes, Ordering::Relaxed);
    }

    pub fn chunk_size(&self) -> usize {
        self.protocol.chunk_size
    }

    /// A message from this peer.
    pub fn message(&self, file_id: FileId, kind: MessageKind) -> Message {
        Message::new(self.version, self.peer_id, file_id, kind)
    }

    /// Encode and multicast on the message's group. Failures are logged.
    pub async fn send(&self, msg: &Message) {
        let group = msg.message_type().group();
        if let Err(e) = self.transport.send(group, msg.encode()).await {
            tracing::warn!(
                kind = %msg.message_type(),
                file_id = msg.file_id.short(),
                chunk_no = ?msg.chunk_no(),
                error = %e,
                "send failed"
            );
        }
    }

    /// Uniform random delay before reacting to a peer.
    pub fn jitter(&self) -> Duration {
        let max = self.protocol.response_jitter_ms;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }
}
