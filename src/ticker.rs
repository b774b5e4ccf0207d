//! Periodic driver for retry sweeps.
//!
//! A sweep that is running when shutdown is requested finishes first; the
//! shutdown signal is only observed between ticks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::gossip::GossipEngine;

pub struct Ticker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Ticker {
    pub fn spawn(engine: Arc<GossipEngine>, period: Duration) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(engine, period, shutdown_rx));
        Self { shutdown, handle }
    }

    /// Signal the ticker and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "ticker task failed");
        }
    }
}

async fn run(engine: Arc<GossipEngine>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    // A slow sweep pushes the schedule back instead of bursting afterwards.
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            // Also fires when the sender is dropped.
            _ = shutdown.changed() => break,
            _ = interval.tick() => {
                engine.sweep(Instant::now().into_std()).await;
            }
        }
    }
    debug!("ticker stopped");
}
