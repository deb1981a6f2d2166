// syncpeers - simulate a header sync round over in-memory peers
//
// Registers a handful of mock peers with different latencies, then drives
// the schedule loop: pick idle peers by capacity, fetch, wait for replies,
// release the slot. Optionally drops one peer halfway to show the requeue.

use clap::Parser;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use syncpeers::downloader::Request;
use syncpeers::{DataKind, Hash, MockRemotePeer, PeerSet, PeerSetConfig};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "syncpeers", version, about = "Simulate a header sync round over mock peers")]
struct Cli {
    /// Number of mock peers to register
    #[arg(long, default_value_t = 4)]
    peers: usize,

    /// Number of headers to download
    #[arg(long, default_value_t = 4096)]
    headers: u64,

    /// Protocol version every mock peer negotiates
    #[arg(long, default_value_t = 64)]
    protocol: u32,

    /// Reply latency of the fastest peer, in milliseconds
    #[arg(long, default_value_t = 20)]
    latency_ms: u64,

    /// Unregister the first peer once half the headers are in
    #[arg(long)]
    drop_peer: bool,

    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(&cli.log_level)
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let set = Arc::new(PeerSet::new(PeerSetConfig::default())?);

    let (join_tx, mut join_rx) = mpsc::channel(16);
    let (drop_tx, mut drop_rx) = mpsc::channel(16);
    let _joins = set.subscribe_new_peers(join_tx);
    let _drops = set.subscribe_peer_drops(drop_tx);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(peer) = join_rx.recv() => info!(peer = peer.id(), "Peer joined"),
                Some(peer) = drop_rx.recv() => info!(peer = peer.id(), "Peer left"),
                else => break,
            }
        }
    });

    // Remote side: every request is answered in full after the peer's latency
    let (request_tx, mut request_rx) = mpsc::unbounded_channel::<(String, Request)>();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<(String, u64, usize)>();
    let mut latencies = HashMap::new();

    for i in 0..cli.peers {
        let id = format!("peer-{i}");
        let remote = MockRemotePeer::new(&id)
            .with_head(Hash::random(), cli.headers as u128)
            .with_forwarder(request_tx.clone());
        let conn = set.connection(id.clone(), cli.protocol, Arc::new(remote));
        set.register(Arc::new(conn))?;
        latencies.insert(id, Duration::from_millis(cli.latency_ms * (i as u64 + 1)));
    }
    drop(request_tx);

    tokio::spawn(async move {
        while let Some((id, request)) = request_rx.recv().await {
            let Request::HeadersByNumber { origin, amount, .. } = request else {
                continue;
            };
            let latency = latencies.get(&id).copied().unwrap_or_default();
            let reply_tx = reply_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(latency).await;
                let _ = reply_tx.send((id, origin, amount));
            });
        }
    });

    // Schedule loop
    let started = Instant::now();
    let mut queue: VecDeque<(u64, usize)> = VecDeque::new();
    let mut pending: HashMap<String, (u64, usize)> = HashMap::new();
    let mut next = 0u64;
    let mut done = 0u64;
    let mut dropped = false;

    while done < cli.headers {
        let (idle, eligible) = set.header_idle_peers();
        if eligible == 0 {
            error!("No peers left able to serve headers");
            break;
        }
        let rtt = set.target_round_trip();

        for peer in idle {
            let (from, count) = match queue.pop_front() {
                Some(range) => range,
                None if next < cli.headers => {
                    let remaining = (cli.headers - next) as usize;
                    let count = peer.capacity(DataKind::Headers, rtt).min(remaining);
                    let range = (next, count);
                    next += count as u64;
                    range
                }
                None => break,
            };
            match peer.fetch_headers(from, count) {
                Ok(()) => {
                    pending.insert(peer.id().to_string(), (from, count));
                }
                Err(err) => {
                    debug!(peer = peer.id(), %err, "Skipping peer");
                    queue.push_front((from, count));
                }
            }
        }

        let reply = tokio::time::timeout(set.target_timeout(), reply_rx.recv()).await;
        match reply {
            Ok(Some((id, origin, delivered))) => {
                let Some(peer) = set.peer(&id) else {
                    debug!(peer = %id, "Late reply from dropped peer");
                    continue;
                };
                // Replies to requests abandoned by a reset were already requeued
                if !settle_reply(&mut pending, &id, origin) {
                    debug!(peer = %id, origin, "Stale reply, range already requeued");
                    continue;
                }
                peer.set_headers_idle(delivered, Instant::now());
                done += delivered as u64;
            }
            Ok(None) => break,
            Err(_) => {
                warn!(pending = pending.len(), "Timed out waiting for replies, resetting peers");
                queue.extend(pending.drain().map(|(_, range)| range));
                set.reset();
                continue;
            }
        }

        if cli.drop_peer && !dropped && done >= cli.headers / 2 {
            dropped = true;
            if let Ok(peer) = set.unregister("peer-0") {
                if let Some(range) = pending.remove(peer.id()) {
                    queue.push_back(range);
                }
            }
        }
    }

    info!(
        headers = done,
        elapsed = ?started.elapsed(),
        median_rtt = ?set.median_round_trip(),
        "Sync round finished"
    );
    for peer in set.all_peers() {
        info!(
            peer = peer.id(),
            capacity = peer.capacity(DataKind::Headers, Duration::from_secs(1)),
            "Final header capacity"
        );
    }
    Ok(())
}

/// Clear `id`'s pending range if the reply answers it, i.e. starts at the
/// same block. A reply to an earlier, requeued range settles nothing.
fn settle_reply(pending: &mut HashMap<String, (u64, usize)>, id: &str, origin: u64) -> bool {
    match pending.get(id) {
        Some((from, _)) if *from == origin => {
            pending.remove(id);
            true
        }
        _ => false,
    }
}
