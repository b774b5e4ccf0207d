//! Peer identities and address records.
//!
//! A [`PeerId`] is a 128-bit random value assigned once and never changed.
//! Peers are told apart by id, not by address: the same machine may rebind
//! to a new endpoint and keep its id.

use std::net::SocketAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const PEER_ID_LEN: usize = 16;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId([u8; PEER_ID_LEN]);

impl PeerId {
    /// Draw a fresh id from the thread-local CSPRNG.
    pub fn random() -> Self {
        Self(rand::random())
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; PEER_ID_LEN]) -> Self {
        Self(bytes)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; PEER_ID_LEN] {
        &self.0
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != PEER_ID_LEN {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; PEER_ID_LEN];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl std::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerId({})", &self.to_hex()[..8])
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; PEER_ID_LEN]> for PeerId {
    fn from(bytes: [u8; PEER_ID_LEN]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for PeerId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A registered peer. Owned by the registry; everything else holds the id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Peer {
    pub id: PeerId,
    pub address: SocketAddr,
}

impl std::fmt::Display for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.id, self.address)
    }
}

/// Externally configured peer: an address with an optional agreed-upon id.
///
/// Parsed from `ADDR` or `ID@ADDR`. Without an id the registry assigns a
/// fresh one, which is local to this node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PeerEntry {
    pub id: Option<PeerId>,
    pub address: SocketAddr,
}

impl From<SocketAddr> for PeerEntry {
    fn from(address: SocketAddr) -> Self {
        Self { id: None, address }
    }
}

impl From<Peer> for PeerEntry {
    fn from(peer: Peer) -> Self {
        Self { id: Some(peer.id), address: peer.address }
    }
}

impl FromStr for PeerEntry {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        use anyhow::Context;

        match s.split_once('@') {
            Some((id_part, addr_part)) => {
                let id = PeerId::from_hex(id_part)
                    .context("peer id must be 32 hex characters (16 bytes)")?;
                let address = addr_part.parse().context("invalid socket address")?;
                Ok(Self { id: Some(id), address })
            }
            None => {
                let address = s.parse().context("invalid socket address")?;
                Ok(Self { id: None, address })
            }
        }
    }
}
