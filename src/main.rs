use std::io::BufRead;
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio::time::{self, Duration};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use gossiper::{
    DEFAULT_FANOUT, DEFAULT_HOP_LIMIT, DEFAULT_RETRY_ATTEMPTS, GossipConfig, GossipEvent,
    IdScheme, Node, PeerEntry, PeerId,
};

#[derive(Parser, Debug)]
#[command(name = "gossiper")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "127.0.0.1:30480")]
    bind: SocketAddr,

    /// Agreed id of this node (32 hex characters). Random if omitted.
    #[arg(long, value_parser = parse_peer_id)]
    id: Option<PeerId>,

    /// Peer as ADDR or ID@ADDR. Repeatable.
    #[arg(short, long = "peer", value_name = "PEER")]
    peers: Vec<PeerEntry>,

    #[arg(short, long, default_value_t = DEFAULT_FANOUT)]
    fanout: usize,

    #[arg(long, default_value = "2000")]
    retry_delay_ms: u64,

    #[arg(long, default_value_t = DEFAULT_RETRY_ATTEMPTS)]
    retry_attempts: u32,

    /// Relays after which a message is no longer forwarded.
    #[arg(long, default_value_t = DEFAULT_HOP_LIMIT, conflicts_with = "no_hop_limit")]
    hop_limit: u32,

    /// Forward without a hop limit.
    #[arg(long)]
    no_hop_limit: bool,

    #[arg(long, default_value = "500")]
    tick_ms: u64,

    /// Derive message ids from payload hashes instead of sequence numbers.
    #[arg(long)]
    content_ids: bool,

    /// Originate a timestamp message this often. 0 disables.
    #[arg(short, long, default_value = "0")]
    announce_interval_secs: u64,
}

fn parse_peer_id(s: &str) -> Result<PeerId> {
    PeerId::from_hex(s).context("peer id must be 32 hex characters (16 bytes)")
}

impl Args {
    fn config(&self) -> GossipConfig {
        GossipConfig {
            bind: self.bind,
            fanout: self.fanout,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            retry_attempts: self.retry_attempts,
            hop_limit: (!self.no_hop_limit).then_some(self.hop_limit),
            tick_interval: Duration::from_millis(self.tick_ms),
            id_scheme: if self.content_ids {
                IdScheme::ContentAddressed
            } else {
                IdScheme::Sequenced
            },
            ..Default::default()
        }
    }
}

/// Lines buffered between the stdin thread and the event loop.
const STDIN_CHANNEL_CAPACITY: usize = 64;

/// Read lines on a detached OS thread. A pending read on tokio's stdin
/// would hold runtime shutdown until the next line or EOF.
fn spawn_line_reader<R: BufRead + Send + 'static>(reader: R) -> Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel(STDIN_CHANNEL_CAPACITY);
    std::thread::Builder::new()
        .name("stdin-reader".into())
        .spawn(move || {
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "stdin read failed");
                        break;
                    }
                }
            }
        })
        .context("failed to spawn stdin reader")?;
    Ok(rx)
}

fn log_event(event: GossipEvent) {
    match event {
        GossipEvent::Received(message) => info!(
            msg_id = %message.id.short(),
            origin = %message.origin,
            hops = message.hop_count,
            payload = %String::from_utf8_lossy(&message.payload),
            "received"
        ),
        GossipEvent::Settled(msg_id) => info!(msg_id = %msg_id.short(), "settled"),
        GossipEvent::DeliveryExhausted { msg_id, peer } => {
            warn!(msg_id = %msg_id.short(), peer = %peer, "delivery exhausted")
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();

    let config = args.config();
    let local_id = args.id.unwrap_or_else(PeerId::random);
    let node = Node::start_with_id(config, local_id, args.peers.iter().copied()).await?;
    info!("Node entry: {}@{}", node.local_id(), node.local_addr());

    let mut events = node.events().await?;
    let mut lines = spawn_line_reader(std::io::BufReader::new(std::io::stdin()))?;
    let mut stdin_open = true;

    let announce = (args.announce_interval_secs > 0)
        .then(|| Duration::from_secs(args.announce_interval_secs));
    let mut announce_interval = time::interval(announce.unwrap_or(Duration::from_secs(3600)));
    announce_interval.tick().await;

    // Graceful shutdown on Ctrl+C
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal, exiting gracefully");
                break;
            }
            Some(event) = events.recv() => log_event(event),
            line = lines.recv(), if stdin_open => match line {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => match node.originate(line.into_bytes()).await {
                    Ok(id) => info!(msg_id = %id.short(), "originated"),
                    Err(e) => warn!(error = %e, "originate failed"),
                },
                None => stdin_open = false,
            },
            _ = announce_interval.tick(), if announce.is_some() => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                let payload = format!("timestamp {} from {}", now, node.local_id());
                if let Err(e) = node.originate(payload.into_bytes()).await {
                    warn!(error = %e, "announce failed");
                }
            }
        }
    }

    node.stop().await;
    Ok(())
}
