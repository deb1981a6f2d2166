// Peer Set - the active peers participating in a chain download
//
// Owns every registered PeerConnection together with the aggregate rate
// trackers, ranks idle peers by estimated capacity, and announces arrivals
// and departures to subscribers.

use super::config::{ConfigError, PeerSetConfig};
use super::peer::PeerConnection;
use super::remote::RemotePeer;
use crate::event::{Feed, Subscription};
use crate::primitives::DataKind;
use crate::rates::{RateError, RateTrackers};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Peer set errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PeerSetError {
    #[error("Peer {0} is already registered")]
    AlreadyRegistered(String),

    #[error("Peer {0} is not registered")]
    NotRegistered(String),

    #[error(transparent)]
    Rates(#[from] RateError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Snapshot of the peer set's occupancy
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PeerSetStats {
    pub total_peers: usize,
    /// Peers with an outstanding fetch, per data kind slot
    pub busy: [usize; 4],
}

impl PeerSetStats {
    pub fn busy(&self, kind: DataKind) -> usize {
        self.busy[kind.index()]
    }

    pub fn idle(&self, kind: DataKind) -> usize {
        self.total_peers - self.busy(kind)
    }
}

/// Map and trackers share one lock so they never disagree on membership
struct Inner {
    peers: HashMap<String, Arc<PeerConnection>>,
    rates: RateTrackers,
}

/// Collection of active peers for one sync session
pub struct PeerSet {
    config: PeerSetConfig,
    inner: RwLock<Inner>,
    new_peer_feed: Feed<Arc<PeerConnection>>,
    peer_drop_feed: Feed<Arc<PeerConnection>>,
}

impl Default for PeerSet {
    fn default() -> Self {
        Self::with_validated(PeerSetConfig::default())
    }
}

impl PeerSet {
    /// Create an empty peer set
    pub fn new(config: PeerSetConfig) -> Result<Self, PeerSetError> {
        config.validate()?;
        Ok(Self::with_validated(config))
    }

    fn with_validated(config: PeerSetConfig) -> Self {
        let rates = RateTrackers::new().with_ttl_limit(config.ttl_limit());
        Self {
            config,
            inner: RwLock::new(Inner {
                peers: HashMap::new(),
                rates,
            }),
            new_peer_feed: Feed::new("new-peer"),
            peer_drop_feed: Feed::new("peer-drop"),
        }
    }

    pub fn config(&self) -> &PeerSetConfig {
        &self.config
    }

    /// Build a connection sized according to this set's configuration
    pub fn connection(
        &self,
        id: impl Into<String>,
        version: u32,
        remote: Arc<dyn RemotePeer>,
    ) -> PeerConnection {
        PeerConnection::new(id, version, remote)
            .with_lacking_capacity(self.config.max_lacking_hashes)
    }

    // ========================================================================
    // SUBSCRIPTIONS
    // ========================================================================

    /// Receive every newly registered peer on `tx`
    pub fn subscribe_new_peers(&self, tx: mpsc::Sender<Arc<PeerConnection>>) -> Subscription {
        self.new_peer_feed.subscribe(tx)
    }

    /// Receive every unregistered peer on `tx`
    pub fn subscribe_peer_drops(&self, tx: mpsc::Sender<Arc<PeerConnection>>) -> Subscription {
        self.peer_drop_feed.subscribe(tx)
    }

    // ========================================================================
    // MEMBERSHIP
    // ========================================================================

    /// Add a peer to the working set.
    ///
    /// The peer's rate tracker is seeded with the mean capacities and median
    /// round-trip of everyone already here, giving it a realistic chance of
    /// being picked for retrievals.
    pub fn register(&self, peer: Arc<PeerConnection>) -> Result<(), PeerSetError> {
        {
            let mut inner = self.inner.write();
            if inner.peers.contains_key(peer.id()) {
                return Err(PeerSetError::AlreadyRegistered(peer.id().to_string()));
            }
            let capacities = inner.rates.mean_capacities();
            let roundtrip = inner.rates.median_round_trip();

            inner.rates.track(peer.id(), peer.rates().clone())?;
            peer.rates().reseed(capacities, roundtrip);
            inner.peers.insert(peer.id().to_string(), peer.clone());
        }
        info!(peer = peer.id(), version = peer.version(), "Peer registered");

        self.new_peer_feed.send(peer);
        Ok(())
    }

    /// Remove a peer from the working set, returning it
    pub fn unregister(&self, id: &str) -> Result<Arc<PeerConnection>, PeerSetError> {
        let peer = {
            let mut inner = self.inner.write();
            let peer = inner
                .peers
                .remove(id)
                .ok_or_else(|| PeerSetError::NotRegistered(id.to_string()))?;
            inner.rates.untrack(id)?;
            peer
        };
        info!(peer = id, "Peer unregistered");

        self.peer_drop_feed.send(peer.clone());
        Ok(peer)
    }

    pub fn peer(&self, id: &str) -> Option<Arc<PeerConnection>> {
        self.inner.read().peers.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().peers.is_empty()
    }

    pub fn all_peers(&self) -> Vec<Arc<PeerConnection>> {
        self.inner.read().peers.values().cloned().collect()
    }

    /// Reset every peer ahead of the next batch of retrievals
    pub fn reset(&self) {
        let inner = self.inner.read();
        for peer in inner.peers.values() {
            peer.reset();
        }
        debug!(peers = inner.peers.len(), "Peer set reset");
    }

    // ========================================================================
    // IDLE PEERS
    // ========================================================================

    /// Peers idle for `kind` whose version lies in `min_protocol..=max_protocol`,
    /// highest one-second capacity first (ties by id).
    ///
    /// Also returns how many peers are version-eligible at all, idle or not,
    /// so callers can tell "all busy" from "nobody can serve this".
    pub fn idle_peers(
        &self,
        kind: DataKind,
        min_protocol: u32,
        max_protocol: u32,
    ) -> (Vec<Arc<PeerConnection>>, usize) {
        let inner = self.inner.read();
        let mut total = 0;
        let mut idle = Vec::with_capacity(inner.peers.len());

        for peer in inner.peers.values() {
            if (min_protocol..=max_protocol).contains(&peer.version()) {
                if peer.is_idle(kind) {
                    let capacity = peer.rates().capacity(kind, Duration::from_secs(1));
                    idle.push((capacity, peer.clone()));
                }
                total += 1;
            }
        }
        drop(inner);

        (rank_by_capacity(idle), total)
    }

    pub fn header_idle_peers(&self) -> (Vec<Arc<PeerConnection>>, usize) {
        self.idle_peers_in_range(DataKind::Headers)
    }

    pub fn body_idle_peers(&self) -> (Vec<Arc<PeerConnection>>, usize) {
        self.idle_peers_in_range(DataKind::Bodies)
    }

    pub fn receipt_idle_peers(&self) -> (Vec<Arc<PeerConnection>>, usize) {
        self.idle_peers_in_range(DataKind::Receipts)
    }

    pub fn node_data_idle_peers(&self) -> (Vec<Arc<PeerConnection>>, usize) {
        self.idle_peers_in_range(DataKind::NodeData)
    }

    fn idle_peers_in_range(&self, kind: DataKind) -> (Vec<Arc<PeerConnection>>, usize) {
        self.idle_peers(kind, self.config.min_protocol, self.config.max_protocol)
    }

    // ========================================================================
    // SESSION RATES
    // ========================================================================

    /// Round-trip each request should be sized for
    pub fn target_round_trip(&self) -> Duration {
        self.inner.write().rates.target_round_trip()
    }

    /// Time after which an outstanding request should be deemed lost
    pub fn target_timeout(&self) -> Duration {
        self.inner.write().rates.target_timeout()
    }

    pub fn mean_capacity(&self, kind: DataKind) -> f64 {
        self.inner.read().rates.mean_capacity(kind)
    }

    pub fn median_round_trip(&self) -> Duration {
        self.inner.read().rates.median_round_trip()
    }

    pub fn stats(&self) -> PeerSetStats {
        let inner = self.inner.read();
        let mut stats = PeerSetStats {
            total_peers: inner.peers.len(),
            busy: [0; 4],
        };
        for peer in inner.peers.values() {
            for kind in DataKind::ALL {
                if !peer.is_idle(kind) {
                    stats.busy[kind.index()] += 1;
                }
            }
        }
        stats
    }
}

/// Order candidates by strictly descending capacity, breaking ties by id
fn rank_by_capacity(mut candidates: Vec<(usize, Arc<PeerConnection>)>) -> Vec<Arc<PeerConnection>> {
    candidates.sort_by(|(cap_a, a), (cap_b, b)| cap_b.cmp(cap_a).then_with(|| a.id().cmp(b.id())));
    candidates.into_iter().map(|(_, peer)| peer).collect()
}
