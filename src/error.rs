//! Error taxonomy for the dissemination core.
//!
//! Configuration and registry misuse surface synchronously to the caller.
//! Transport failures never reach this type: the retry scheduler absorbs
//! them and only reports [`GossipError::DeliveryExhausted`] once the attempt
//! ceiling is crossed.

use std::net::SocketAddr;

use crate::identity::PeerId;
use crate::messages::MessageId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GossipError {
    /// The address is already registered to another peer.
    DuplicateAddress(SocketAddr),
    /// The id is already registered to another peer.
    DuplicatePeer(PeerId),
    /// No peer with this id is registered.
    NotFound(PeerId),
    /// A send was recorded for a message that was never marked seen.
    UnknownMessage(MessageId),
    /// An inbound datagram could not be parsed into a message.
    Decode(String),
    /// A configuration value is out of range.
    InvalidConfiguration(&'static str),
    /// An originated payload does not fit the configured maximum.
    PayloadTooLarge { size: usize, limit: usize },
    /// Every attempt to deliver `msg_id` to `peer` failed.
    DeliveryExhausted { msg_id: MessageId, peer: PeerId },
}

impl std::fmt::Display for GossipError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateAddress(addr) => write!(f, "address {} is already registered", addr),
            Self::DuplicatePeer(peer) => write!(f, "peer {} is already registered", peer),
            Self::NotFound(peer) => write!(f, "peer {} not found", peer),
            Self::UnknownMessage(id) => write!(f, "message {} was never marked seen", id),
            Self::Decode(reason) => write!(f, "malformed datagram: {}", reason),
            Self::InvalidConfiguration(reason) => write!(f, "invalid configuration: {}", reason),
            Self::PayloadTooLarge { size, limit } => {
                write!(f, "payload of {} bytes exceeds the {} byte limit", size, limit)
            }
            Self::DeliveryExhausted { msg_id, peer } => {
                write!(f, "delivery of {} to {} exhausted all attempts", msg_id, peer)
            }
        }
    }
}

impl std::error::Error for GossipError {}

impl From<bincode::Error> for GossipError {
    fn from(err: bincode::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

pub type Result<T, E = GossipError> = std::result::Result<T, E>;
