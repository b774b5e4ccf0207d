//! # Gossip Dissemination Engine
//!
//! Push-based epidemic broadcast over a statically configured peer set.
//!
//! ## Message Flow
//!
//! 1. **Ingest**: every decoded gossip datagram is acknowledged to its source
//! 2. **Novelty**: `mark_seen` decides whether the id is new; known ids drop
//! 3. **Fanout**: a novel message below the hop ceiling is pushed to up to
//!    `fanout` random peers, never back to its sender or origin
//! 4. **Retry**: each push is tracked until acknowledged or exhausted
//!
//! ## Message States
//!
//! | State | Meaning |
//! |-------|---------|
//! | Unseen | id not in global history |
//! | Propagating | at least one delivery attempt outstanding |
//! | Settled | seen, every attempt delivered or exhausted |
//!
//! The `Seen` step between the first two never outlives a single `receive`
//! or `originate` call: the id is marked seen and its fanout dispatched in
//! the same call.
//!
//! ## Locking
//!
//! Registry, history and scheduler each guard their own state. The engine
//! calls them one at a time and never holds a lock across a transport send.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::config::{GossipConfig, IdScheme};
use crate::error::{GossipError, Result};
use crate::history::MessageHistory;
use crate::identity::{Peer, PeerEntry, PeerId};
use crate::messages::{Datagram, Message, MessageId, decode_datagram, encode_datagram};
use crate::protocols::Transport;
use crate::registry::PeerRegistry;
use crate::retry::{Completion, RetryScheduler, SweepReport};

/// Buffered events before new ones are dropped.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GossipEvent {
    /// A novel message arrived from the network.
    Received(Message),
    /// The last outstanding delivery of a message this node dispatched
    /// completed.
    Settled(MessageId),
    /// Retries to one peer ran out. Non-fatal.
    DeliveryExhausted { msg_id: MessageId, peer: PeerId },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageState {
    Unseen,
    Propagating,
    Settled,
}

/// What `receive` did with a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Receipt {
    /// Already in history; nothing was done.
    Duplicate,
    /// Newly recorded, with the number of peers it was dispatched to.
    Accepted { dispatched: usize },
}

pub struct GossipEngine {
    local_id: PeerId,
    config: GossipConfig,
    registry: PeerRegistry,
    history: MessageHistory,
    scheduler: RetryScheduler,
    transport: Arc<dyn Transport>,
    next_seqno: AtomicU64,
    events: mpsc::Sender<GossipEvent>,
}

impl std::fmt::Debug for GossipEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GossipEngine")
            .field("local_id", &self.local_id)
            .field("peers", &self.registry.len())
            .field("seen", &self.history.seen_count())
            .field("pending", &self.scheduler.pending_count())
            .finish()
    }
}

impl GossipEngine {
    /// Validates `config` and returns the engine with its event stream.
    pub fn new(
        local_id: PeerId,
        config: GossipConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<(Self, mpsc::Receiver<GossipEvent>)> {
        config.validate()?;
        let scheduler = RetryScheduler::new(config.retry_delay, config.retry_attempts)?;
        let (events, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        // Seeded from the clock so a restart under an agreed id does not
        // reuse ids its peers already hold in history.
        let first_seqno = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);

        let engine = Self {
            local_id,
            config,
            registry: PeerRegistry::new(),
            history: MessageHistory::new(),
            scheduler,
            transport,
            next_seqno: AtomicU64::new(first_seqno),
            events,
        };
        Ok((engine, events_rx))
    }

    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    pub fn config(&self) -> &GossipConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    // ========================================================================
    // Membership
    // ========================================================================

    /// Register a peer. A newly added peer only sees messages that arrive
    /// after it joined.
    pub fn add_peer(&self, entry: PeerEntry) -> Result<PeerId> {
        match entry.id {
            Some(id) => self.registry.add_with_id(id, entry.address),
            None => self.registry.add(entry.address),
        }
    }

    /// Unregister a peer and drop its per-peer history. Attempts already in
    /// flight to it run to their natural end.
    pub fn remove_peer(&self, id: &PeerId) -> Result<Peer> {
        let peer = self.registry.remove(id)?;
        let released = self.history.forget(id);
        trace!(peer = %id, released, "per-peer history forgotten");
        Ok(peer)
    }

    pub fn rebind_peer(&self, id: &PeerId, address: SocketAddr) -> Result<()> {
        self.registry.rebind(id, address)
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.registry.list()
    }

    pub fn message_state(&self, id: &MessageId) -> MessageState {
        if !self.history.has_seen(id) {
            MessageState::Unseen
        } else if self.scheduler.outstanding(id) > 0 {
            MessageState::Propagating
        } else {
            MessageState::Settled
        }
    }

    pub fn pending_deliveries(&self) -> usize {
        self.scheduler.pending_count()
    }

    // ========================================================================
    // Ingest
    // ========================================================================

    /// Entry point for one raw inbound datagram.
    pub async fn handle_datagram(&self, bytes: &[u8], from: SocketAddr) -> Result<()> {
        let datagram = match decode_datagram(bytes) {
            Ok(datagram) => datagram,
            Err(e) => {
                warn!(from = %from, len = bytes.len(), error = %e, "dropping malformed datagram");
                return Err(e);
            }
        };

        match datagram {
            Datagram::Gossip(message) => {
                if self.config.id_scheme == IdScheme::ContentAddressed && !message.has_content_id() {
                    warn!(from = %from, msg_id = %message.id.short(), "dropping message with forged content id");
                    return Err(GossipError::Decode("message id does not match its payload".into()));
                }
                self.send_ack(message.id, from).await;
                let sender = self.registry.lookup(&from);
                self.receive(message, sender).await;
            }
            Datagram::Ack { msg_id } => self.handle_ack(msg_id, from),
        }
        Ok(())
    }

    /// Record `message` and, if it is novel and below the hop ceiling, push
    /// it onward. `sender` is the registered peer it came from, if known.
    pub async fn receive(&self, message: Message, sender: Option<PeerId>) -> Receipt {
        if !self.history.mark_seen(message.id) {
            trace!(msg_id = %message.id.short(), "duplicate message dropped");
            return Receipt::Duplicate;
        }

        debug!(
            msg_id = %message.id.short(),
            origin = %message.origin,
            hops = message.hop_count,
            len = message.payload.len(),
            "novel message"
        );
        self.emit(GossipEvent::Received(message.clone()));

        if !self.config.may_forward(message.hop_count) {
            debug!(msg_id = %message.id.short(), hops = message.hop_count, "hop ceiling reached, not forwarding");
            return Receipt::Accepted { dispatched: 0 };
        }

        let mut exclude = vec![self.local_id, message.origin];
        exclude.extend(sender);
        let dispatched = self.fanout(&message.forwarded(), &exclude).await;
        Receipt::Accepted { dispatched }
    }

    /// Create a message from this node and push it to the network.
    pub async fn originate(&self, payload: Vec<u8>) -> Result<MessageId> {
        if payload.len() > self.config.max_payload_size {
            return Err(GossipError::PayloadTooLarge {
                size: payload.len(),
                limit: self.config.max_payload_size,
            });
        }

        let message = match self.config.id_scheme {
            IdScheme::Sequenced => {
                let seqno = self.next_seqno.fetch_add(1, Ordering::Relaxed);
                Message::new(self.local_id, seqno, payload)
            }
            IdScheme::ContentAddressed => Message::content_addressed(self.local_id, payload),
        };
        if !self.history.mark_seen(message.id) {
            // Same payload already seen under content addressing.
            debug!(msg_id = %message.id.short(), "originated message already known");
            return Ok(message.id);
        }

        let dispatched = self.fanout(&message, &[self.local_id]).await;
        debug!(msg_id = %message.id.short(), dispatched, "originated message");
        Ok(message.id)
    }

    /// Push `message` to up to `fanout` peers outside `exclude` that have not
    /// been sent it before. Returns the number of dispatches.
    async fn fanout(&self, message: &Message, exclude: &[PeerId]) -> usize {
        let targets = self.registry.select_fanout(exclude, self.config.fanout);
        if targets.is_empty() {
            trace!(msg_id = %message.id.short(), "no fanout targets");
            return 0;
        }

        let datagram: Arc<[u8]> = match encode_datagram(&Datagram::Gossip(message.clone())) {
            Ok(bytes) => bytes.into(),
            Err(e) => {
                warn!(msg_id = %message.id.short(), error = %e, "failed to encode message");
                return 0;
            }
        };

        // Read through tokio so a paused test clock drives retry deadlines too.
        let now = tokio::time::Instant::now().into_std();
        let mut dispatched = 0;
        for peer_id in targets {
            // Recorded before the send; a failed send is the scheduler's job.
            match self.history.mark_sent_to(peer_id, message.id) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(msg_id = %message.id.short(), error = %e, "skipping dispatch");
                    continue;
                }
            }
            // Checked after recording: a removal that raced past `forget`
            // must not leave a set behind for a departed peer.
            let Some(peer) = self.registry.get(&peer_id) else {
                self.history.forget(&peer_id);
                continue;
            };

            self.scheduler
                .register(message.id, peer_id, peer.address, datagram.clone(), now);
            if let Err(e) = self.transport.send(peer.address, &datagram).await {
                debug!(
                    msg_id = %message.id.short(),
                    peer = %peer_id,
                    error = %e,
                    "initial send failed, left to retry"
                );
            }
            dispatched += 1;
        }
        dispatched
    }

    // ========================================================================
    // Acknowledgement & Retry
    // ========================================================================

    async fn send_ack(&self, msg_id: MessageId, to: SocketAddr) {
        let bytes = match encode_datagram(&Datagram::Ack { msg_id }) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to encode ack");
                return;
            }
        };
        if let Err(e) = self.transport.send(to, &bytes).await {
            trace!(to = %to, error = %e, "ack send failed");
        }
    }

    fn handle_ack(&self, msg_id: MessageId, from: SocketAddr) {
        let Some(peer) = self.registry.lookup(&from) else {
            trace!(from = %from, "ack from unregistered address ignored");
            return;
        };
        self.acknowledge(&msg_id, &peer);
    }

    /// Mark the delivery of `msg_id` to `peer` as done. No-op if it was not
    /// pending.
    pub fn acknowledge(&self, msg_id: &MessageId, peer: &PeerId) {
        if let Some(done) = self.scheduler.acknowledge(msg_id, peer) {
            trace!(msg_id = %msg_id.short(), peer = %peer, attempts = done.attempt.attempt_count, "delivered");
            self.completed(&done);
        }
    }

    /// One retry pass over every due attempt.
    pub async fn sweep(&self, now: Instant) -> SweepReport {
        let report = self.scheduler.sweep(self.transport.as_ref(), now).await;

        for done in &report.exhausted {
            if let Some(err) = done.to_error() {
                warn!(error = %err, "giving up on delivery");
            }
            self.emit(GossipEvent::DeliveryExhausted {
                msg_id: done.attempt.msg_id,
                peer: done.attempt.peer,
            });
            self.completed(done);
        }
        if report.resent + report.failed > 0 {
            trace!(resent = report.resent, failed = report.failed, "retry sweep");
        }
        report
    }

    fn completed(&self, done: &Completion) {
        if done.settled {
            debug!(msg_id = %done.attempt.msg_id.short(), "message settled");
            self.emit(GossipEvent::Settled(done.attempt.msg_id));
        }
    }

    fn emit(&self, event: GossipEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.events.try_send(event) {
            debug!(?event, "event channel full, event dropped");
        }
    }
}
