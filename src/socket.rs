use std::io::ErrorKind;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::net::{lookup_host, UdpSocket};
use tracing::{debug, info};

/// This is an abstraction for exchanging single datagrams with a peer, introduced to
///  facilitate mocking the I/O part away for testing. Datagrams are delivered whole or not
///  at all; there is no ordering and no reliability.
///
/// Waiting with a deadline is not part of the contract - callers that need one wrap
///  `recv_from` in `tokio::time::timeout`, and a timer expiry is a regular protocol event
///  rather than an error.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FrameSocket: Send + Sync + 'static {
    async fn send_to(&self, frame_buf: &[u8], to: SocketAddr) -> anyhow::Result<()>;

    async fn recv_from(&self, buf: &mut [u8]) -> anyhow::Result<(usize, SocketAddr)>;
}

#[async_trait]
impl FrameSocket for UdpSocket {
    async fn send_to(&self, frame_buf: &[u8], to: SocketAddr) -> anyhow::Result<()> {
        loop {
            match UdpSocket::send_to(self, frame_buf, to).await {
                Ok(_) => return Ok(()),
                // NB: an interrupted syscall is a spurious wake, not a timeout and not an error
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e).with_context(|| format!("sending datagram to {:?}", to)),
            }
        }
    }

    async fn recv_from(&self, buf: &mut [u8]) -> anyhow::Result<(usize, SocketAddr)> {
        loop {
            match UdpSocket::recv_from(self, buf).await {
                Ok(x) => return Ok(x),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e).context("receiving datagram"),
            }
        }
    }
}

/// Binds the listening socket for a receiver: IPv6 first, which on dual-stack hosts also
///  accepts IPv4-mapped traffic, falling back to plain IPv4.
pub async fn bind_listener(port: u16) -> anyhow::Result<UdpSocket> {
    let socket = match UdpSocket::bind((Ipv6Addr::UNSPECIFIED, port)).await {
        Ok(socket) => socket,
        Err(e) => {
            debug!("IPv6 bind failed ({}), falling back to IPv4", e);
            UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))
                .await
                .with_context(|| format!("binding UDP port {}", port))?
        }
    };
    info!("bound receive socket to {:?}", socket.local_addr()?);
    Ok(socket)
}

/// Resolves a host/port pair to the peer address, taking the resolver's first answer.
pub async fn resolve_peer(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    lookup_host((host, port))
        .await
        .with_context(|| format!("resolving {}:{}", host, port))?
        .next()
        .ok_or_else(|| anyhow!("no address found for {}:{}", host, port))
}

/// Binds an ephemeral local socket matching the peer's address family.
pub async fn bind_for_peer(peer_addr: &SocketAddr) -> anyhow::Result<UdpSocket> {
    let local_addr: SocketAddr = if peer_addr.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    UdpSocket::bind(local_addr)
        .await
        .context("binding local send socket")
}
