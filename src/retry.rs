//! # Retry Scheduler
//!
//! Tracks every in-flight (message, peer) delivery until it is acknowledged
//! or runs out of attempts.
//!
//! ## Attempt Lifecycle
//!
//! | State | Entered when | Leaves the table |
//! |-------|--------------|------------------|
//! | Pending | `register` (initial dispatch counts as attempt 1) | no |
//! | Delivered | `acknowledge` | yes |
//! | Exhausted | `attempt_count` exceeds the ceiling | yes |
//!
//! Retries use a fixed delay. A sweep resends every due attempt and bumps
//! its count whether or not the send succeeded: a successful datagram send
//! is not a delivery, only an acknowledgement is. A failed resend that
//! pushes the count past the ceiling exhausts the attempt immediately; a
//! successful one gets one more delay to be acknowledged.
//!
//! ## Sweep Atomicity
//!
//! Sweeps are serialized by an async lock held for the whole pass, so two
//! overlapping ticks can never resend the same attempt twice. State is
//! mutated before and after the sends, never while a send is awaited, so an
//! aborted sweep leaves every surviving attempt exactly as it was.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::error::{GossipError, Result};
use crate::identity::PeerId;
use crate::messages::MessageId;
use crate::protocols::Transport;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryState {
    Pending,
    Delivered,
    Exhausted,
}

#[derive(Clone, Debug)]
pub struct DeliveryAttempt {
    pub msg_id: MessageId,
    pub peer: PeerId,
    /// Destination captured at dispatch. Later registry rebinds do not
    /// redirect an attempt already in flight.
    pub address: SocketAddr,
    pub attempt_count: u32,
    pub next_retry_at: Instant,
    pub state: DeliveryState,
    datagram: Arc<[u8]>,
}

/// An attempt that left the table.
#[derive(Clone, Debug)]
pub struct Completion {
    pub attempt: DeliveryAttempt,
    /// True if this was the last outstanding delivery of the message.
    pub settled: bool,
}

impl Completion {
    /// The reportable error for an exhausted attempt.
    pub fn to_error(&self) -> Option<GossipError> {
        (self.attempt.state == DeliveryState::Exhausted).then_some(GossipError::DeliveryExhausted {
            msg_id: self.attempt.msg_id,
            peer: self.attempt.peer,
        })
    }
}

#[derive(Debug, Default)]
pub struct SweepReport {
    /// Resends the transport accepted.
    pub resent: usize,
    /// Resends the transport refused.
    pub failed: usize,
    pub exhausted: Vec<Completion>,
}

type AttemptKey = (MessageId, PeerId);

#[derive(Debug, Default)]
struct SchedulerState {
    attempts: HashMap<AttemptKey, DeliveryAttempt>,
    /// Pending attempts per message; a message with no entry is settled.
    outstanding: HashMap<MessageId, usize>,
}

impl SchedulerState {
    fn complete(&mut self, key: &AttemptKey, state: DeliveryState) -> Option<Completion> {
        let mut attempt = self.attempts.remove(key)?;
        attempt.state = state;

        let settled = match self.outstanding.get_mut(&key.0) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.outstanding.remove(&key.0);
                true
            }
            None => true,
        };
        Some(Completion { attempt, settled })
    }
}

pub struct RetryScheduler {
    retry_delay: Duration,
    max_attempts: u32,
    state: Mutex<SchedulerState>,
    sweep_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for RetryScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryScheduler")
            .field("retry_delay", &self.retry_delay)
            .field("max_attempts", &self.max_attempts)
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl RetryScheduler {
    pub fn new(retry_delay: Duration, max_attempts: u32) -> Result<Self> {
        if retry_delay.is_zero() {
            return Err(GossipError::InvalidConfiguration("retry delay must be positive"));
        }
        if max_attempts == 0 {
            return Err(GossipError::InvalidConfiguration("retry attempt ceiling must be positive"));
        }
        Ok(Self {
            retry_delay,
            max_attempts,
            state: Mutex::new(SchedulerState::default()),
            sweep_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Track a dispatch of `datagram` to `peer`. Returns false if this
    /// (message, peer) pair is already pending; the existing attempt is kept.
    pub fn register(
        &self,
        msg_id: MessageId,
        peer: PeerId,
        address: SocketAddr,
        datagram: Arc<[u8]>,
        now: Instant,
    ) -> bool {
        let mut state = self.lock();
        let key = (msg_id, peer);
        if state.attempts.contains_key(&key) {
            return false;
        }
        state.attempts.insert(key, DeliveryAttempt {
            msg_id,
            peer,
            address,
            attempt_count: 1,
            next_retry_at: now + self.retry_delay,
            state: DeliveryState::Pending,
            datagram,
        });
        *state.outstanding.entry(msg_id).or_insert(0) += 1;
        true
    }

    /// Mark the attempt delivered and drop it. `None` if it was never
    /// registered or already completed.
    pub fn acknowledge(&self, msg_id: &MessageId, peer: &PeerId) -> Option<Completion> {
        self.lock().complete(&(*msg_id, *peer), DeliveryState::Delivered)
    }

    /// Resend every attempt due at `now`, exhausting those past the ceiling.
    pub async fn sweep<T: Transport + ?Sized>(&self, transport: &T, now: Instant) -> SweepReport {
        let _pass = self.sweep_lock.lock().await;
        let mut report = SweepReport::default();

        let due: Vec<(AttemptKey, SocketAddr, Arc<[u8]>)> = {
            let mut state = self.lock();
            let mut due = Vec::new();
            let mut expired = Vec::new();
            for (key, attempt) in state.attempts.iter() {
                if attempt.next_retry_at > now {
                    continue;
                }
                if attempt.attempt_count > self.max_attempts {
                    expired.push(*key);
                } else {
                    due.push((*key, attempt.address, attempt.datagram.clone()));
                }
            }
            report.exhausted.extend(
                expired.iter().filter_map(|key| state.complete(key, DeliveryState::Exhausted)),
            );
            due
        };

        let mut outcomes = Vec::with_capacity(due.len());
        for (key, address, datagram) in due {
            let result = transport.send(address, &datagram).await;
            if let Err(e) = &result {
                trace!(
                    msg_id = %key.0.short(),
                    peer = %key.1,
                    error = %e,
                    "resend failed"
                );
            }
            outcomes.push((key, result.is_ok()));
        }

        let mut state = self.lock();
        for (key, sent) in outcomes {
            // Acknowledged while the send was in flight.
            let Some(attempt) = state.attempts.get_mut(&key) else {
                continue;
            };
            attempt.attempt_count = attempt.attempt_count.saturating_add(1);
            attempt.next_retry_at = now + self.retry_delay;
            let over_ceiling = attempt.attempt_count > self.max_attempts;

            if sent {
                report.resent += 1;
            } else {
                report.failed += 1;
                if over_ceiling
                    && let Some(done) = state.complete(&key, DeliveryState::Exhausted)
                {
                    report.exhausted.push(done);
                }
            }
        }

        report
    }

    pub fn pending_count(&self) -> usize {
        self.lock().attempts.len()
    }

    /// Pending deliveries of `msg_id`; zero once it has settled.
    pub fn outstanding(&self, msg_id: &MessageId) -> usize {
        self.lock().outstanding.get(msg_id).copied().unwrap_or(0)
    }

    pub fn attempt(&self, msg_id: &MessageId, peer: &PeerId) -> Option<DeliveryAttempt> {
        self.lock().attempts.get(&(*msg_id, *peer)).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
