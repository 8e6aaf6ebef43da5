//! In-memory transport hub.
//!
//! Every joined peer gets its own inbound channels. A multicast send is
//! copied to every member, the sender included (like multicast loopback),
//! and each copy to another member is dropped with the configured loss
//! probability. Direct sends go to one member and fail only when that
//! member's direct path has been switched off.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use futures::future::BoxFuture;
use rand::Rng;
use tokio::sync::mpsc;

use peerstash_core::{Group, PeerId};

use super::{inbound_channels, Inbound, InboundSenders, Transport};

const PPM: u32 = 1_000_000;

/// A datagram observed on the hub, for test assertions.
#[derive(Debug, Clone)]
pub struct Tapped {
    pub from: PeerId,
    pub group: Group,
    pub datagram: Bytes,
}

#[derive(Default)]
pub struct MemoryHub {
    members: DashMap<PeerId, InboundSenders>,
    taps: DashMap<u64, mpsc::UnboundedSender<Tapped>>,
    next_tap: AtomicU32,
    /// Loss probability in parts per million.
    loss_ppm: AtomicU32,
    direct_down: DashSet<PeerId>,
    direct_attempts: DashMap<PeerId, u32>,
}

impl MemoryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Drop each copy to another member with probability `loss` (0.0..=1.0).
    pub fn set_loss(&self, loss: f64) {
        let ppm = (loss.clamp(0.0, 1.0) * PPM as f64) as u32;
        self.loss_ppm.store(ppm, Ordering::Relaxed);
    }

    /// Join the hub as `peer`. Re-joining replaces the previous channels.
    pub fn join(self: &Arc<Self>, peer: PeerId) -> (Arc<MemoryTransport>, Inbound) {
        let (senders, inbound) = inbound_channels();
        self.members.insert(peer, senders);
        (
            Arc::new(MemoryTransport {
                hub: self.clone(),
                peer,
            }),
            inbound,
        )
    }

    /// Refuse (or accept again) direct sends addressed to `peer`.
    pub fn set_direct_reachable(&self, peer: PeerId, reachable: bool) {
        if reachable {
            self.direct_down.remove(&peer);
        } else {
            self.direct_down.insert(peer);
        }
    }

    /// Direct sends attempted towards `peer`, refused ones included.
    pub fn direct_attempts(&self, peer: PeerId) -> u32 {
        self.direct_attempts.get(&peer).map(|n| *n).unwrap_or(0)
    }

    pub fn leave(&self, peer: PeerId) {
        self.members.remove(&peer);
    }

    /// Receive a copy of every multicast datagram sent from now on.
    pub fn tap(&self) -> mpsc::UnboundedReceiver<Tapped> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_tap.fetch_add(1, Ordering::Relaxed) as u64;
        self.taps.insert(id, tx);
        rx
    }

    fn multicast(&self, from: PeerId, group: Group, datagram: Bytes) {
        self.taps.retain(|_, tap| {
            tap.send(Tapped {
                from,
                group,
                datagram: datagram.clone(),
            })
            .is_ok()
        });

        let loss = self.loss_ppm.load(Ordering::Relaxed);
        let targets: Vec<(PeerId, mpsc::Sender<Bytes>)> = self
            .members
            .iter()
            .map(|m| (*m.key(), m.value().for_group(group).clone()))
            .collect();

        let mut rng = rand::thread_rng();
        for (peer, tx) in targets {
            if peer != from && loss > 0 && rng.gen_range(0..PPM) < loss {
                tracing::trace!(from, to = peer, group = group.name(), "datagram lost");
                continue;
            }
            let _ = tx.try_send(datagram.clone());
        }
    }

    fn direct(&self, to: PeerId, datagram: Bytes) -> io::Result<()> {
        *self.direct_attempts.entry(to).or_insert(0) += 1;
        if self.direct_down.contains(&to) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "direct path down"));
        }
        let tx = self
            .members
            .get(&to)
            .map(|m| m.direct.clone())
            .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, "peer not on hub"))?;
        tx.try_send(datagram)
            .map_err(|_| io::Error::new(io::ErrorKind::WouldBlock, "direct queue unavailable"))
    }
}

/// One member's handle on the hub.
pub struct MemoryTransport {
    hub: Arc<MemoryHub>,
    peer: PeerId,
}

impl Transport for MemoryTransport {
    fn send(&self, group: Group, datagram: Bytes) -> BoxFuture<'_, io::Result<()>> {
        self.hub.multicast(self.peer, group, datagram);
        Box::pin(async { Ok::<(), io::Error>(()) })
    }

    fn send_direct(&self, peer: PeerId, datagram: Bytes) -> BoxFuture<'_, io::Result<()>> {
        let result = self.hub.direct(peer, datagram);
        Box::pin(async move { result })
    }
}
