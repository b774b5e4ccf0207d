//! # Gossiper - Epidemic Message Dissemination
//!
//! Gossiper propagates messages across a statically configured set of peers
//! so that, as long as the peer graph is connected, every message reaches
//! every peer:
//!
//! - **Push fanout**: each novel message goes to a random subset of peers
//! - **History**: global and per-peer sets stop loops and duplicate work
//! - **Retries**: unacknowledged sends are retried with a fixed delay, up to
//!   a ceiling
//! - **Transport**: UDP datagrams, or an in-memory network for simulations
//!
//! ## Architecture
//!
//! Each component guards its own state behind a synchronized contract. The
//! [`GossipEngine`] coordinates them and is shared by the receive loop (one
//! task per inbound datagram) and the retry ticker.
//!
//! ## Module Overview
//!
//! | Module | Purpose |
//! |--------|--------|
//! | `node` | Lifecycle: receive loop, ticker, shutdown |
//! | `gossip` | Dissemination engine |
//! | `registry` | Known peer set and fanout selection |
//! | `history` | Global and per-peer message history |
//! | `retry` | Delivery attempts and retry sweeps |
//! | `ticker` | Periodic sweep driver |
//! | `identity` | Peer ids and peer entries |
//! | `messages` | Message ids and the wire format |
//! | `protocols` | Transport trait |
//! | `transport` | UDP and in-memory transports |
//! | `config` | Engine configuration and defaults |
//! | `error` | Error taxonomy |

mod config;
mod error;
mod gossip;
mod history;
mod identity;
mod messages;
mod node;
mod protocols;
mod registry;
mod retry;
mod ticker;
mod transport;

pub use config::{
    DEFAULT_FANOUT, DEFAULT_HOP_LIMIT, DEFAULT_HOST, DEFAULT_MAX_PAYLOAD_SIZE, DEFAULT_PORT,
    DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY, DEFAULT_TICK_INTERVAL, GossipConfig, IdScheme,
};
pub use error::{GossipError, Result};
pub use gossip::{EVENT_CHANNEL_CAPACITY, GossipEngine, GossipEvent, MessageState, Receipt};
pub use history::MessageHistory;
pub use identity::{PEER_ID_LEN, Peer, PeerEntry, PeerId};
pub use messages::{
    Datagram, MAX_DATAGRAM_SIZE, Message, MessageId, decode_datagram, encode_datagram,
};
pub use node::Node;
pub use protocols::Transport;
pub use registry::PeerRegistry;
pub use retry::{Completion, DeliveryAttempt, DeliveryState, RetryScheduler, SweepReport};
pub use ticker::Ticker;
pub use transport::{MemoryNetwork, MemoryTransport, SEND_LOG_CAPACITY, SendRecord, UdpTransport};
