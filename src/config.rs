//! Engine configuration.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::error::{GossipError, Result};
use crate::messages::MAX_DATAGRAM_SIZE;

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_HOST: Ipv4Addr = Ipv4Addr::LOCALHOST;

pub const DEFAULT_PORT: u16 = 30480;

/// Peers each novel message is pushed to.
pub const DEFAULT_FANOUT: usize = 3;

/// Delay between delivery attempts to the same peer.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(2000);

/// Resends allowed after the initial dispatch before an attempt is exhausted.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 10;

/// Relays after which a message is no longer forwarded.
pub const DEFAULT_HOP_LIMIT: u32 = 16;

/// Interval between retry sweeps.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(500);

/// Largest payload accepted by `originate`, leaving room for the envelope.
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = MAX_DATAGRAM_SIZE - 1024;

/// How originated messages are identified.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IdScheme {
    /// Hash of origin and per-origin sequence number.
    #[default]
    Sequenced,
    /// Hash of the payload. Receivers check the id against the payload, so
    /// an origin cannot claim an id it did not earn. Identical payloads share
    /// an id and only the first one propagates.
    ContentAddressed,
}

#[derive(Clone, Debug)]
pub struct GossipConfig {
    /// Address the transport binds to.
    pub bind: SocketAddr,
    /// Number of peers each novel message is pushed to.
    pub fanout: usize,
    /// Fixed delay between attempts to deliver to one peer.
    pub retry_delay: Duration,
    /// Attempt ceiling. An attempt whose count exceeds this is exhausted.
    pub retry_attempts: u32,
    /// Messages received at or above this hop count are not forwarded.
    /// `None` forwards without limit.
    pub hop_limit: Option<u32>,
    /// Interval of the ticker driving retry sweeps.
    pub tick_interval: Duration,
    pub max_payload_size: usize,
    pub id_scheme: IdScheme,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((DEFAULT_HOST, DEFAULT_PORT)),
            fanout: DEFAULT_FANOUT,
            retry_delay: DEFAULT_RETRY_DELAY,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            hop_limit: Some(DEFAULT_HOP_LIMIT),
            tick_interval: DEFAULT_TICK_INTERVAL,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            id_scheme: IdScheme::default(),
        }
    }
}

impl GossipConfig {
    pub fn validate(&self) -> Result<()> {
        if self.fanout == 0 {
            return Err(GossipError::InvalidConfiguration("fanout must be at least 1"));
        }
        if self.retry_delay.is_zero() {
            return Err(GossipError::InvalidConfiguration("retry delay must be positive"));
        }
        if self.retry_attempts == 0 {
            return Err(GossipError::InvalidConfiguration("retry attempt ceiling must be positive"));
        }
        if self.hop_limit == Some(0) {
            return Err(GossipError::InvalidConfiguration("hop limit must be positive"));
        }
        if self.tick_interval.is_zero() {
            return Err(GossipError::InvalidConfiguration("tick interval must be positive"));
        }
        if self.max_payload_size == 0 || self.max_payload_size > DEFAULT_MAX_PAYLOAD_SIZE {
            return Err(GossipError::InvalidConfiguration(
                "max payload size must fit in a single datagram",
            ));
        }
        Ok(())
    }

    /// Whether a message that arrived with `hop_count` may be relayed.
    pub fn may_forward(&self, hop_count: u32) -> bool {
        self.hop_limit.is_none_or(|limit| hop_count < limit)
    }
}
