//! Global and per-peer message history.
//!
//! The global set is the single source of truth for "is this new". It only
//! grows: an entry removed here would let an already-delivered message come
//! back as novel and restart its propagation. The resulting memory growth is
//! a known caveat of this design, one id (32 bytes plus set overhead) per
//! message ever seen.
//!
//! Per-peer sets record what was sent to whom. Invariant: every per-peer set
//! is a subset of the global set, enforced by [`MessageHistory::mark_sent_to`].

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::error::{GossipError, Result};
use crate::identity::PeerId;
use crate::messages::MessageId;

#[derive(Debug, Default)]
struct HistoryState {
    global: HashSet<MessageId>,
    per_peer: HashMap<PeerId, HashSet<MessageId>>,
}

#[derive(Debug, Default)]
pub struct MessageHistory {
    state: Mutex<HistoryState>,
}

impl MessageHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_seen(&self, id: &MessageId) -> bool {
        self.lock().global.contains(id)
    }

    /// Insert into the global set. Returns true if `id` was not there yet,
    /// which makes this the atomic novelty check for concurrent receivers.
    pub fn mark_seen(&self, id: MessageId) -> bool {
        self.lock().global.insert(id)
    }

    pub fn has_sent_to(&self, peer: &PeerId, id: &MessageId) -> bool {
        self.lock()
            .per_peer
            .get(peer)
            .is_some_and(|sent| sent.contains(id))
    }

    /// Record that `id` went to `peer`. Returns true if it was not recorded
    /// before. Fails with `UnknownMessage` if `id` was never marked seen.
    pub fn mark_sent_to(&self, peer: PeerId, id: MessageId) -> Result<bool> {
        let mut state = self.lock();
        if !state.global.contains(&id) {
            return Err(GossipError::UnknownMessage(id));
        }
        Ok(state.per_peer.entry(peer).or_default().insert(id))
    }

    /// Drop everything recorded for a departed peer. Returns how many entries
    /// were released.
    pub fn forget(&self, peer: &PeerId) -> usize {
        self.lock().per_peer.remove(peer).map_or(0, |sent| sent.len())
    }

    pub fn seen_count(&self) -> usize {
        self.lock().global.len()
    }

    pub fn sent_count(&self, peer: &PeerId) -> usize {
        self.lock().per_peer.get(peer).map_or(0, |sent| sent.len())
    }

    fn lock(&self) -> MutexGuard<'_, HistoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
