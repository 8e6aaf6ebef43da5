//! peerstash integration test harness.
//!
//! Every scenario runs a small population of peers in one process, joined
//! through the in-memory transport hub. No multicast routing or privileges
//! are needed, and datagram loss can be switched on per hub.
//!
//!   cargo test --test integration

mod backup_restore;
mod convergence;
mod delete;
mod direct_fallback;
mod reclaim;
mod restart;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use peerstash_core::config::ProtocolConfig;
use peerstash_core::{ChunkKey, FileId, Message, MessageType, PeerId};
use peerstashd::transport::memory::{MemoryHub, Tapped};
use peerstashd::{NodeOptions, PeerNode};
use tokio::sync::mpsc;

// ── Harness ───────────────────────────────────────────────────────────────────

static CLUSTER_COUNTER: AtomicU64 = AtomicU64::new(0);

pub const CAPACITY: u64 = 10_000_000;

/// Protocol timings short enough for tests.
pub fn fast_protocol() -> ProtocolConfig {
    ProtocolConfig {
        response_jitter_ms: 20,
        base_timeout_ms: 150,
        backup_retries: 5,
        restore_interval_ms: 100,
        restore_max_rounds: 50,
        direct_retry_delay_ms: 10,
        validate_attempts: 3,
        validate_delay_ms: 100,
        ignore_ttl_ms: 500,
        ..ProtocolConfig::default()
    }
}

/// Non-zero bytes, so no chunk loses trailing bytes when stored.
pub fn test_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 250 + 1) as u8).collect()
}

/// A population of peers sharing one hub and one scratch directory.
pub struct Cluster {
    pub hub: Arc<MemoryHub>,
    pub dir: PathBuf,
    nodes: BTreeMap<PeerId, Arc<PeerNode>>,
}

impl Cluster {
    pub async fn start(peers: &[PeerId]) -> Result<Self> {
        let n = CLUSTER_COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!(
            "peerstash-integration-{}-{}",
            std::process::id(),
            n
        ));
        std::fs::create_dir_all(&dir)?;

        let mut cluster = Self {
            hub: MemoryHub::new(),
            dir,
            nodes: BTreeMap::new(),
        };
        for &peer in peers {
            cluster.spawn(peer)?;
        }
        Ok(cluster)
    }

    fn options(&self, peer: PeerId) -> NodeOptions {
        let root = self.dir.join(format!("peer{}", peer));
        NodeOptions {
            peer_id: peer,
            protocol: fast_protocol(),
            restore_dir: root.join("restored"),
            root,
            capacity: CAPACITY,
        }
    }

    fn spawn(&mut self, peer: PeerId) -> Result<()> {
        let (transport, inbound) = self.hub.join(peer);
        let node = PeerNode::start(self.options(peer), transport, inbound)?;
        self.nodes.insert(peer, node);
        Ok(())
    }

    pub fn node(&self, peer: PeerId) -> &Arc<PeerNode> {
        &self.nodes[&peer]
    }

    /// Take a peer off the hub and stop it. Its disk state stays.
    pub async fn stop(&mut self, peer: PeerId) -> Result<()> {
        self.hub.leave(peer);
        if let Some(node) = self.nodes.remove(&peer) {
            node.shutdown().await?;
        }
        Ok(())
    }

    /// Bring a stopped peer back over the same root.
    pub fn restart(&mut self, peer: PeerId) -> Result<&Arc<PeerNode>> {
        self.spawn(peer)?;
        Ok(self.node(peer))
    }

    /// Write a source file for a backup.
    pub fn write_file(&self, name: &str, data: &[u8]) -> Result<PathBuf> {
        let src = self.dir.join("src");
        std::fs::create_dir_all(&src)?;
        let path = src.join(name);
        std::fs::write(&path, data).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Running peers holding the chunk on disk, by id.
    pub fn holders(&self, key: &ChunkKey) -> Vec<PeerId> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.context().store.has(key))
            .map(|(&peer, _)| peer)
            .collect()
    }

    pub async fn shutdown(mut self) {
        let peers: Vec<PeerId> = self.nodes.keys().copied().collect();
        for peer in peers {
            let _ = self.stop(peer).await;
        }
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

/// Poll `check` every 20 ms until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Decoded messages seen on a tap so far.
pub fn drain_tap(tap: &mut mpsc::UnboundedReceiver<Tapped>) -> Vec<Message> {
    let mut out = Vec::new();
    while let Ok(t) = tap.try_recv() {
        if let Ok(msg) = Message::decode(&t.datagram) {
            out.push(msg);
        }
    }
    out
}

pub fn count_of(messages: &[Message], kind: MessageType, file_id: &FileId) -> usize {
    messages
        .iter()
        .filter(|m| m.message_type() == kind && &m.file_id == file_id)
        .count()
}

pub fn read(path: &Path) -> Vec<u8> {
    std::fs::read(path).unwrap_or_default()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

/// Peers come up with empty stores and report themselves.
#[tokio::test]
async fn test_cluster_starts_empty() {
    let cluster = Cluster::start(&[1, 2, 3]).await.unwrap();

    for peer in [1, 2, 3] {
        let state = cluster.node(peer).state();
        assert_eq!(state.peer_id, peer);
        assert_eq!(state.version, "1.0");
        assert_eq!(state.capacity, CAPACITY);
        assert_eq!(state.used, 0);
        assert_eq!(state.free, CAPACITY);
        assert!(state.backed_up.is_empty());
        assert!(state.stored.is_empty());
    }

    cluster.shutdown().await;
}
