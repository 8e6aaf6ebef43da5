//! Transport seam between the protocol engine and the network.
//!
//! Outbound traffic goes through [`Transport`]; inbound datagrams arrive on
//! one channel per group plus one for the direct path, bundled in
//! [`Inbound`]. Production uses UDP multicast with a TCP direct path; tests
//! and simulations use the in-memory hub.

pub mod direct;
pub mod memory;
pub mod multicast;

use std::io;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

use peerstash_core::{Group, PeerId};

/// Depth of each inbound channel. A full channel drops, like a full socket buffer.
pub const INBOUND_QUEUE: usize = 1024;

pub trait Transport: Send + Sync + 'static {
    /// Multicast one datagram on a group.
    fn send(&self, group: Group, datagram: Bytes) -> BoxFuture<'_, io::Result<()>>;

    /// Deliver one datagram to a single peer's direct listener.
    fn send_direct(&self, peer: PeerId, datagram: Bytes) -> BoxFuture<'_, io::Result<()>>;
}

/// Receiving ends for everything addressed to this peer.
pub struct Inbound {
    pub control: mpsc::Receiver<Bytes>,
    pub data: mpsc::Receiver<Bytes>,
    pub recovery: mpsc::Receiver<Bytes>,
    pub direct: mpsc::Receiver<Bytes>,
}

/// Sending ends matching an [`Inbound`].
#[derive(Clone)]
pub(crate) struct InboundSenders {
    pub control: mpsc::Sender<Bytes>,
    pub data: mpsc::Sender<Bytes>,
    pub recovery: mpsc::Sender<Bytes>,
    pub direct: mpsc::Sender<Bytes>,
}

impl InboundSenders {
    pub fn for_group(&self, group: Group) -> &mpsc::Sender<Bytes> {
        match group {
            Group::Control => &self.control,
            Group::Data => &self.data,
            Group::Recovery => &self.recovery,
        }
    }
}

pub(crate) fn inbound_channels() -> (InboundSenders, Inbound) {
    let (control_tx, control) = mpsc::channel(INBOUND_QUEUE);
    let (data_tx, data) = mpsc::channel(INBOUND_QUEUE);
    let (recovery_tx, recovery) = mpsc::channel(INBOUND_QUEUE);
    let (direct_tx, direct) = mpsc::channel(INBOUND_QUEUE);
    (
        InboundSenders {
            control: control_tx,
            data: data_tx,
            recovery: recovery_tx,
            direct: direct_tx,
        },
        Inbound {
            control,
            data,
            recovery,
            direct,
        },
    )
}
