//! Known peer set.
//!
//! The registry is the sole owner of [`Peer`] records. Readers always get
//! copies, so a fanout iterating a snapshot never observes a concurrent add
//! or remove.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use rand::seq::SliceRandom;
use tracing::debug;

use crate::error::{GossipError, Result};
use crate::identity::{Peer, PeerId};

#[derive(Debug, Default)]
struct RegistryState {
    /// Insertion order.
    peers: Vec<Peer>,
    by_addr: HashMap<SocketAddr, PeerId>,
}

impl RegistryState {
    fn position(&self, id: &PeerId) -> Option<usize> {
        self.peers.iter().position(|p| p.id == *id)
    }
}

#[derive(Debug, Default)]
pub struct PeerRegistry {
    state: RwLock<RegistryState>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `address` under a fresh random id.
    pub fn add(&self, address: SocketAddr) -> Result<PeerId> {
        self.add_with_id(PeerId::random(), address)
    }

    /// Register `address` under an externally agreed id.
    pub fn add_with_id(&self, id: PeerId, address: SocketAddr) -> Result<PeerId> {
        let mut state = self.write();
        if state.by_addr.contains_key(&address) {
            return Err(GossipError::DuplicateAddress(address));
        }
        if state.position(&id).is_some() {
            return Err(GossipError::DuplicatePeer(id));
        }
        state.by_addr.insert(address, id);
        state.peers.push(Peer { id, address });
        debug!(peer = %id, address = %address, "peer added");
        Ok(id)
    }

    pub fn remove(&self, id: &PeerId) -> Result<Peer> {
        let mut state = self.write();
        let index = state.position(id).ok_or(GossipError::NotFound(*id))?;
        let peer = state.peers.remove(index);
        state.by_addr.remove(&peer.address);
        debug!(peer = %peer.id, address = %peer.address, "peer removed");
        Ok(peer)
    }

    /// Point an existing peer at a new address, keeping its id.
    pub fn rebind(&self, id: &PeerId, address: SocketAddr) -> Result<()> {
        let mut state = self.write();
        let index = state.position(id).ok_or(GossipError::NotFound(*id))?;
        match state.by_addr.get(&address) {
            Some(owner) if owner == id => return Ok(()),
            Some(_) => return Err(GossipError::DuplicateAddress(address)),
            None => {}
        }
        let old = std::mem::replace(&mut state.peers[index].address, address);
        state.by_addr.remove(&old);
        state.by_addr.insert(address, *id);
        debug!(peer = %id, from = %old, to = %address, "peer rebound");
        Ok(())
    }

    pub fn get(&self, id: &PeerId) -> Option<Peer> {
        let state = self.read();
        state.position(id).map(|i| state.peers[i])
    }

    /// Id of the peer registered at `address`, if any.
    pub fn lookup(&self, address: &SocketAddr) -> Option<PeerId> {
        self.read().by_addr.get(address).copied()
    }

    /// Snapshot in insertion order.
    pub fn list(&self) -> Vec<Peer> {
        self.read().peers.clone()
    }

    pub fn len(&self) -> usize {
        self.read().peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().peers.is_empty()
    }

    /// Up to `k` peers chosen uniformly at random without replacement,
    /// skipping every id in `exclude`. Returns all candidates if there are
    /// fewer than `k`.
    pub fn select_fanout(&self, exclude: &[PeerId], k: usize) -> Vec<PeerId> {
        let candidates: Vec<PeerId> = self
            .read()
            .peers
            .iter()
            .map(|p| p.id)
            .filter(|id| !exclude.contains(id))
            .collect();

        if candidates.len() <= k {
            return candidates;
        }
        candidates
            .choose_multiple(&mut rand::thread_rng(), k)
            .copied()
            .collect()
    }

    // Poisoning only happens if a holder panicked mid-update; every update
    // here leaves the maps consistent before it can panic.
    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}
