//! # Datagram Transports
//!
//! Two implementations of [`Transport`]:
//!
//! | Transport | Backing | Use |
//! |-----------|---------|-----|
//! | [`UdpTransport`] | tokio `UdpSocket` | Real deployments |
//! | [`MemoryTransport`] | in-process channels | Simulations and tests |
//!
//! Both are unreliable, unordered datagram channels. Delivery confirmation
//! is the protocol's job (see `Datagram::Ack`), not the transport's.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::messages::MAX_DATAGRAM_SIZE;
use crate::protocols::Transport;

// ============================================================================
// UDP
// ============================================================================

pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("failed to bind UDP socket on {}", addr))?;
        debug!(addr = %socket.local_addr()?, "UDP transport bound");
        Ok(Self { socket })
    }
}

impl std::fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpTransport")
            .field("socket", &self.socket.local_addr())
            .finish()
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, to: SocketAddr, payload: &[u8]) -> Result<()> {
        let sent = self.socket.send_to(payload, to).await?;
        if sent != payload.len() {
            anyhow::bail!("short send to {}: {} of {} bytes", to, sent, payload.len());
        }
        Ok(())
    }

    async fn recv(&self) -> Result<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let (len, from) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(len);
        Ok((buf, from))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().context("failed to get local address")
    }
}

// ============================================================================
// In-memory network
// ============================================================================

type Inbox = mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>;

/// Send records kept per [`MemoryTransport`]; older ones are discarded.
pub const SEND_LOG_CAPACITY: usize = 4096;

/// One send invocation observed by a [`MemoryTransport`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendRecord {
    pub to: SocketAddr,
    pub payload: Vec<u8>,
    /// False when the send was refused because the endpoint was failing.
    pub accepted: bool,
}

/// In-process datagram hub. Endpoints created from the same network can
/// reach each other by address; datagrams to unknown addresses vanish, as
/// they would on a real wire.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inboxes: Arc<Mutex<HashMap<SocketAddr, Inbox>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new endpoint at `addr`, replacing any previous one.
    pub fn endpoint(&self, addr: SocketAddr) -> MemoryTransport {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock_inboxes().insert(addr, tx);
        MemoryTransport {
            addr,
            network: self.clone(),
            inbox: tokio::sync::Mutex::new(rx),
            failing: AtomicBool::new(false),
            sent: Mutex::new(VecDeque::new()),
        }
    }

    /// Detach the endpoint at `addr`; later datagrams to it are dropped.
    pub fn disconnect(&self, addr: &SocketAddr) {
        self.lock_inboxes().remove(addr);
    }

    fn deliver(&self, from: SocketAddr, to: SocketAddr, payload: &[u8]) {
        let inbox = self.lock_inboxes().get(&to).cloned();
        match inbox {
            Some(tx) => {
                if tx.send((payload.to_vec(), from)).is_err() {
                    trace!(to = %to, "memory endpoint closed, datagram dropped");
                }
            }
            None => trace!(to = %to, "no memory endpoint, datagram dropped"),
        }
    }

    fn lock_inboxes(&self) -> std::sync::MutexGuard<'_, HashMap<SocketAddr, Inbox>> {
        // A poisoned map still holds valid senders.
        self.inboxes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct MemoryTransport {
    addr: SocketAddr,
    network: MemoryNetwork,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>>,
    failing: AtomicBool,
    sent: Mutex<VecDeque<SendRecord>>,
}

impl MemoryTransport {
    /// While failing, every send returns an error and nothing is delivered.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// The most recent send invocations, oldest first, at most
    /// [`SEND_LOG_CAPACITY`] of them.
    pub fn sent(&self) -> Vec<SendRecord> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).iter().cloned().collect()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, to: SocketAddr, payload: &[u8]) -> Result<()> {
        let accepted = !self.failing.load(Ordering::SeqCst);
        {
            let mut log = self.sent.lock().unwrap_or_else(|e| e.into_inner());
            if log.len() == SEND_LOG_CAPACITY {
                log.pop_front();
            }
            log.push_back(SendRecord { to, payload: payload.to_vec(), accepted });
        }

        if !accepted {
            anyhow::bail!("memory endpoint {} is failing", self.addr);
        }
        self.network.deliver(self.addr, to, payload);
        Ok(())
    }

    async fn recv(&self) -> Result<(Vec<u8>, SocketAddr)> {
        self.inbox
            .lock()
            .await
            .recv()
            .await
            .context("memory network dropped this endpoint")
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn memory_endpoints_exchange_datagrams() {
        let network = MemoryNetwork::new();
        let a = network.endpoint(addr(9001));
        let b = network.endpoint(addr(9002));

        a.send(addr(9002), b"ping").await.unwrap();
        let (payload, from) = b.recv().await.unwrap();
        assert_eq!(payload, b"ping");
        assert_eq!(from, addr(9001));
        assert_eq!(a.sent().len(), 1);
        assert!(a.sent()[0].accepted);
    }

    #[tokio::test]
    async fn failing_endpoint_refuses_sends() {
        let network = MemoryNetwork::new();
        let a = network.endpoint(addr(9001));
        let _b = network.endpoint(addr(9002));

        a.set_failing(true);
        assert!(a.send(addr(9002), b"lost").await.is_err());
        let log = a.sent();
        assert_eq!(log.len(), 1);
        assert!(!log[0].accepted);

        a.set_failing(false);
        assert!(a.send(addr(9002), b"found").await.is_ok());
    }

    #[tokio::test]
    async fn unknown_destination_is_silently_dropped() {
        let network = MemoryNetwork::new();
        let a = network.endpoint(addr(9001));
        assert!(a.send(addr(9999), b"void").await.is_ok());

        network.disconnect(&addr(9001));
        let b = network.endpoint(addr(9002));
        assert!(b.send(addr(9001), b"gone").await.is_ok());
    }

    #[tokio::test]
    async fn send_log_keeps_only_the_newest_records() {
        let network = MemoryNetwork::new();
        let a = network.endpoint(addr(9001));

        for i in 0..SEND_LOG_CAPACITY + 10 {
            a.send(addr(9999), &(i as u32).to_le_bytes()).await.unwrap();
        }
        let log = a.sent();
        assert_eq!(log.len(), SEND_LOG_CAPACITY);
        assert_eq!(log[0].payload, 10u32.to_le_bytes());
        assert_eq!(
            log.last().unwrap().payload,
            ((SEND_LOG_CAPACITY + 9) as u32).to_le_bytes()
        );
    }

    #[tokio::test]
    async fn udp_transport_roundtrip_on_loopback() {
        let a = UdpTransport::bind(addr(0)).await.unwrap();
        let b = UdpTransport::bind(addr(0)).await.unwrap();
        let b_addr = b.local_addr().unwrap();

        a.send(b_addr, b"datagram").await.unwrap();
        let (payload, from) = b.recv().await.unwrap();
        assert_eq!(payload, b"datagram");
        assert_eq!(from, a.local_addr().unwrap());
    }
}
