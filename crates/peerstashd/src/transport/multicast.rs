//! UDP IPv4 multicast transport.
//!
//! One receive socket is joined to each group and pumped into its inbound
//! channel by a dedicated task. A single unbound-port socket sends to all
//! three groups. The direct path is a TCP listener on
//! `direct_base_port + peer_id * direct_port_stride`.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use futures::future::BoxFuture;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use peerstash_core::config::NetworkConfig;
use peerstash_core::wire::max_datagram;
use peerstash_core::{Group, PeerId};

use super::{direct, inbound_channels, Inbound, Transport};

pub struct MulticastTransport {
    socket: UdpSocket,
    network: NetworkConfig,
}

impl MulticastTransport {
    /// Join the three groups, start the direct listener, and return the
    /// transport with its inbound channels.
    pub async fn bind(
        network: &NetworkConfig,
        peer_id: PeerId,
        chunk_size: usize,
    ) -> Result<(Arc<Self>, Inbound)> {
        let (senders, inbound) = inbound_channels();
        let max_len = max_datagram(chunk_size);

        for (group, addr) in [
            (Group::Control, network.control_group),
            (Group::Data, network.data_group),
            (Group::Recovery, network.recovery_group),
        ] {
            let socket = make_listener_socket(addr, network.interface, network.loopback)
                .with_context(|| format!("failed to join {} group {}", group.name(), addr))?;
            let socket =
                UdpSocket::from_std(socket).context("failed to convert to tokio UdpSocket")?;
            let tx = senders.for_group(group).clone();
            tokio::spawn(pump_loop(socket, group, tx, max_len));
            tracing::info!(group = group.name(), %addr, "joined multicast group");
        }

        let direct_port = network
            .direct_port(peer_id)
            .with_context(|| format!("peer {} has no direct port", peer_id))?;
        let direct_addr = SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::UNSPECIFIED), direct_port);
        direct::listen(direct_addr, senders.direct.clone(), max_len).await?;

        let socket = make_sender_socket(network.interface, network.multicast_ttl, network.loopback)
            .context("failed to create multicast send socket")?;
        let socket = UdpSocket::from_std(socket).context("failed to convert to tokio UdpSocket")?;

        Ok((
            Arc::new(Self {
                socket,
                network: network.clone(),
            }),
            inbound,
        ))
    }

    fn group_addr(&self, group: Group) -> SocketAddrV4 {
        match group {
            Group::Control => self.network.control_group,
            Group::Data => self.network.data_group,
            Group::Recovery => self.network.recovery_group,
        }
    }
}

impl Transport for MulticastTransport {
    fn send(&self, group: Group, datagram: Bytes) -> BoxFuture<'_, io::Result<()>> {
        let dest = self.group_addr(group);
        Box::pin(async move {
            let n = self.socket.send_to(&datagram, dest).await?;
            tracing::trace!(group = group.name(), bytes = n, "multicast sent");
            Ok::<(), io::Error>(())
        })
    }

    fn send_direct(&self, peer: PeerId, datagram: Bytes) -> BoxFuture<'_, io::Result<()>> {
        let port = self.network.direct_port(peer);
        let host = self.network.direct_host;
        Box::pin(async move {
            let port = port.ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, format!("peer {} has no direct port", peer))
            })?;
            direct::send(SocketAddr::new(host, port), &datagram).await
        })
    }
}

/// Forward every datagram received on `socket` into `tx`.
///
/// Runs until the inbound channel is dropped.
async fn pump_loop(socket: UdpSocket, group: Group, tx: mpsc::Sender<Bytes>, max_len: usize) {
    let mut buf = vec![0u8; max_len];
    loop {
        let len = match socket.recv_from(&mut buf).await {
            Ok((len, _)) => len,
            Err(e) => {
                tracing::warn!(group = group.name(), error = %e, "recv_from failed");
                continue;
            }
        };
        match tx.try_send(Bytes::copy_from_slice(&buf[..len])) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(group = group.name(), "inbound queue full, dropping datagram");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return,
        }
    }
}

/// Create a UDP socket bound to the group port and joined to the group.
fn make_listener_socket(
    group: SocketAddrV4,
    interface: Ipv4Addr,
    loopback: bool,
) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;

    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, group.port());
    socket.bind(&bind_addr.into()).context("bind()")?;

    socket
        .join_multicast_v4(group.ip(), &interface)
        .context("IP_ADD_MEMBERSHIP")?;
    socket
        .set_multicast_loop_v4(loopback)
        .context("IP_MULTICAST_LOOP")?;

    Ok(socket.into())
}

/// Create a UDP socket suitable for sending IPv4 multicast.
fn make_sender_socket(interface: Ipv4Addr, ttl: u32, loopback: bool) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_nonblocking(true).context("set_nonblocking")?;
    socket
        .set_multicast_if_v4(&interface)
        .context("IP_MULTICAST_IF")?;
    socket.set_multicast_ttl_v4(ttl).context("IP_MULTICAST_TTL")?;
    socket
        .set_multicast_loop_v4(loopback)
        .context("IP_MULTICAST_LOOP")?;
    socket
        .bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0).into())
        .context("bind()")?;

    Ok(socket.into())
}
