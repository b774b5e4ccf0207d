//! Transport trait consumed by the gossip engine.
//!
//! The engine never touches a socket directly. Anything that can move an
//! opaque datagram to an address, and hand back the next inbound one, can
//! carry the protocol: [`crate::transport::UdpTransport`] in production,
//! [`crate::transport::MemoryTransport`] in simulations.

use std::net::SocketAddr;

use anyhow::Result;
use async_trait::async_trait;

/// Datagram transport operations.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send one datagram. Any error means "try again later"; the engine does
    /// not inspect it.
    async fn send(&self, to: SocketAddr, payload: &[u8]) -> Result<()>;

    /// Wait for the next inbound datagram.
    async fn recv(&self) -> Result<(Vec<u8>, SocketAddr)>;

    /// Address datagrams from this transport appear to come from.
    fn local_addr(&self) -> Result<SocketAddr>;
}
