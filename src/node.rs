//! # High-Level Node API
//!
//! A [`Node`] wires a transport to a [`GossipEngine`] and runs the two
//! background contexts: the receive loop and the retry ticker.
//!
//! ## Quick Start
//!
//! ```ignore
//! let config = GossipConfig { bind: "127.0.0.1:9001".parse()?, ..Default::default() };
//! let peers = vec!["127.0.0.1:9002".parse::<PeerEntry>()?];
//! let node = Node::start(config, peers).await?;
//!
//! let mut events = node.events().await?;
//! node.originate(b"hello".to_vec()).await?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! node.stop().await;
//! ```
//!
//! ## Shutdown Order
//!
//! 1. Ticker signalled and awaited (a running sweep completes)
//! 2. Receive loop signalled, then every in-flight datagram handler awaited
//! 3. Transport released with the last engine reference

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, trace, warn};

use crate::config::GossipConfig;
use crate::gossip::{GossipEngine, GossipEvent, MessageState};
use crate::identity::{Peer, PeerEntry, PeerId};
use crate::messages::MessageId;
use crate::protocols::Transport;
use crate::ticker::Ticker;
use crate::transport::UdpTransport;

/// Pause after a failed receive before polling the transport again.
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// A receiver that can be taken exactly once via `.take()`.
type TakeOnce<T> = tokio::sync::Mutex<Option<mpsc::Receiver<T>>>;

pub struct Node {
    engine: Arc<GossipEngine>,
    local_addr: SocketAddr,
    events: TakeOnce<GossipEvent>,
    ticker: Ticker,
    shutdown: watch::Sender<bool>,
    listener: JoinHandle<()>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("local_addr", &self.local_addr)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Bind a UDP socket at `config.bind` under a fresh random id.
    pub async fn start(config: GossipConfig, peers: impl IntoIterator<Item = PeerEntry>) -> Result<Self> {
        Self::start_with_id(config, PeerId::random(), peers).await
    }

    /// Like [`Node::start`], with an agreed-upon id that other nodes list as
    /// `ID@ADDR`.
    pub async fn start_with_id(
        config: GossipConfig,
        local_id: PeerId,
        peers: impl IntoIterator<Item = PeerEntry>,
    ) -> Result<Self> {
        config.validate()?;
        let transport = UdpTransport::bind(config.bind)
            .await
            .with_context(|| format!("failed to bind {}", config.bind))?;
        Self::with_transport(config, local_id, Arc::new(transport), peers)
    }

    /// Run over any transport. Must be called from within a tokio runtime.
    pub fn with_transport(
        config: GossipConfig,
        local_id: PeerId,
        transport: Arc<dyn Transport>,
        peers: impl IntoIterator<Item = PeerEntry>,
    ) -> Result<Self> {
        let local_addr = transport.local_addr().context("transport has no local address")?;
        let tick_interval = config.tick_interval;

        let (engine, events_rx) = GossipEngine::new(local_id, config, transport)?;
        for entry in peers {
            engine
                .add_peer(entry)
                .with_context(|| format!("failed to add peer {}", entry.address))?;
        }
        let engine = Arc::new(engine);

        let ticker = Ticker::spawn(engine.clone(), tick_interval);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let listener = tokio::spawn(receive_loop(engine.clone(), shutdown_rx));

        info!(
            id = %local_id,
            addr = %local_addr,
            peers = engine.peers().len(),
            "gossip node started"
        );

        Ok(Self {
            engine,
            local_addr,
            events: tokio::sync::Mutex::new(Some(events_rx)),
            ticker,
            shutdown,
            listener,
        })
    }

    pub fn local_id(&self) -> PeerId {
        self.engine.local_id()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// This node as other nodes should list it.
    pub fn peer_entry(&self) -> PeerEntry {
        PeerEntry { id: Some(self.local_id()), address: self.local_addr }
    }

    pub async fn originate(&self, payload: Vec<u8>) -> Result<MessageId> {
        Ok(self.engine.originate(payload).await?)
    }

    pub fn add_peer(&self, entry: PeerEntry) -> Result<PeerId> {
        Ok(self.engine.add_peer(entry)?)
    }

    pub fn add_peer_with_id(&self, id: PeerId, address: SocketAddr) -> Result<PeerId> {
        self.add_peer(PeerEntry { id: Some(id), address })
    }

    /// Unregister a peer and forget what was sent to it.
    pub fn remove_peer(&self, id: &PeerId) -> Result<Peer> {
        Ok(self.engine.remove_peer(id)?)
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.engine.peers()
    }

    pub fn message_state(&self, id: &MessageId) -> MessageState {
        self.engine.message_state(id)
    }

    /// The event stream. Can be taken once.
    pub async fn events(&self) -> Result<mpsc::Receiver<GossipEvent>> {
        self.events
            .lock()
            .await
            .take()
            .context("event receiver already taken")
    }

    /// Stop the ticker, then the receive loop, then release the transport.
    pub async fn stop(self) {
        self.ticker.stop().await;

        let _ = self.shutdown.send(true);
        if let Err(e) = self.listener.await {
            warn!(error = %e, "receive loop failed");
        }
        info!(id = %self.engine.local_id(), addr = %self.local_addr, "gossip node stopped");
    }
}

async fn receive_loop(engine: Arc<GossipEngine>, mut shutdown: watch::Receiver<bool>) {
    let mut handlers = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            // Also fires when the node is dropped without `stop`.
            _ = shutdown.changed() => break,
            Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                if let Err(e) = joined {
                    warn!(error = %e, "datagram handler failed");
                }
            }
            received = engine.transport().recv() => match received {
                Ok((bytes, from)) => {
                    let engine = engine.clone();
                    handlers.spawn(async move {
                        if let Err(e) = engine.handle_datagram(&bytes, from).await {
                            trace!(from = %from, error = %e, "datagram rejected");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "transport receive failed");
                    tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                }
            },
        }
    }

    let in_flight = handlers.len();
    while let Some(joined) = handlers.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "datagram handler failed");
        }
    }
    debug!(in_flight, "receive loop stopped");
}
