// Peer Connection - one remote peer's scheduling state
//
// Tracks which data kinds are currently being fetched from the peer, how fast
// it has delivered so far, and which items it is known not to have.

use super::lacking::LackingSet;
use super::remote::{RemoteError, RemotePeer};
use crate::primitives::{DataKind, Hash};
use crate::rates::RateTracker;
use parking_lot::RwLock;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, trace, warn, Instrument, Span};

/// Fetch scheduling errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchError {
    #[error("Already fetching {0} from peer")]
    AlreadyFetching(DataKind),

    #[error("No async runtime to dispatch {0} fetch on")]
    NoRuntime(DataKind),
}

/// State guarded by the per-peer lock
#[derive(Debug)]
struct SessionState {
    /// When the outstanding fetch of each kind started; None while idle
    started: [Option<Instant>; 4],
    /// Items not to request from this peer again
    lacking: LackingSet,
}

/// An active peer from which headers, bodies, receipts and state are fetched
pub struct PeerConnection {
    id: String,
    version: u32,
    /// Busy flag per data kind, flipped only by compare-and-swap
    busy: [AtomicBool; 4],
    state: RwLock<SessionState>,
    rates: Arc<RateTracker>,
    remote: Arc<dyn RemotePeer>,
    span: Span,
}

impl PeerConnection {
    /// Create a session for a peer that negotiated `version`
    pub fn new(id: impl Into<String>, version: u32, remote: Arc<dyn RemotePeer>) -> Self {
        let id = id.into();
        let span = tracing::debug_span!("peer", id = %id, version);
        Self {
            id,
            version,
            busy: Default::default(),
            state: RwLock::new(SessionState {
                started: [None; 4],
                lacking: LackingSet::default(),
            }),
            rates: Arc::new(RateTracker::default()),
            remote,
            span,
        }
    }

    /// Cap the lacking set at `capacity` entries
    pub fn with_lacking_capacity(self, capacity: usize) -> Self {
        self.state.write().lacking = LackingSet::new(capacity);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// The peer's reported best block and total difficulty
    pub fn head(&self) -> (Hash, u128) {
        self.remote.head()
    }

    /// Shared handle on this peer's throughput estimator
    pub fn rates(&self) -> &Arc<RateTracker> {
        &self.rates
    }

    pub fn is_idle(&self, kind: DataKind) -> bool {
        !self.busy[kind.index()].load(Ordering::Acquire)
    }

    /// Start time of the outstanding fetch of `kind`, if any
    pub fn started_at(&self, kind: DataKind) -> Option<Instant> {
        self.state.read().started[kind.index()]
    }

    /// Clear all busy flags and forget lacking items, ready for a new round
    pub fn reset(&self) {
        let mut state = self.state.write();
        for flag in &self.busy {
            flag.store(false, Ordering::Release);
        }
        state.started = [None; 4];
        state.lacking.clear();
        debug!(parent: &self.span, "Peer state reset");
    }

    // ========================================================================
    // FETCHING
    // ========================================================================

    /// Request `count` headers upwards from block number `from`, without gaps
    pub fn fetch_headers(&self, from: u64, count: usize) -> Result<(), FetchError> {
        let runtime = self.begin_fetch(DataKind::Headers)?;
        trace!(parent: &self.span, from, count, "Fetching headers");

        let remote = self.remote.clone();
        self.dispatch(&runtime, DataKind::Headers, async move {
            remote.request_headers_by_number(from, count, 0, false).await
        });
        Ok(())
    }

    /// Request `count` headers starting at the block with hash `origin`
    pub fn fetch_headers_by_hash(
        &self,
        origin: Hash,
        count: usize,
        skip: usize,
        reverse: bool,
    ) -> Result<(), FetchError> {
        let runtime = self.begin_fetch(DataKind::Headers)?;
        trace!(parent: &self.span, origin = %origin.short(), count, skip, reverse, "Fetching headers by hash");

        let remote = self.remote.clone();
        self.dispatch(&runtime, DataKind::Headers, async move {
            remote.request_headers_by_hash(origin, count, skip, reverse).await
        });
        Ok(())
    }

    /// Request the bodies of the blocks with the given hashes
    pub fn fetch_bodies(&self, hashes: Vec<Hash>) -> Result<(), FetchError> {
        let runtime = self.begin_fetch(DataKind::Bodies)?;
        trace!(parent: &self.span, count = hashes.len(), "Fetching bodies");

        let remote = self.remote.clone();
        self.dispatch(&runtime, DataKind::Bodies, async move { remote.request_bodies(hashes).await });
        Ok(())
    }

    /// Request the receipts of the blocks with the given hashes
    pub fn fetch_receipts(&self, hashes: Vec<Hash>) -> Result<(), FetchError> {
        let runtime = self.begin_fetch(DataKind::Receipts)?;
        trace!(parent: &self.span, count = hashes.len(), "Fetching receipts");

        let remote = self.remote.clone();
        self.dispatch(&runtime, DataKind::Receipts, async move { remote.request_receipts(hashes).await });
        Ok(())
    }

    /// Request state trie nodes by hash
    pub fn fetch_node_data(&self, hashes: Vec<Hash>) -> Result<(), FetchError> {
        let runtime = self.begin_fetch(DataKind::NodeData)?;
        trace!(parent: &self.span, count = hashes.len(), "Fetching node data");

        let remote = self.remote.clone();
        self.dispatch(&runtime, DataKind::NodeData, async move { remote.request_node_data(hashes).await });
        Ok(())
    }

    /// Claim the `kind` slot. Panics if the peer's protocol cannot serve
    /// `kind`: asking anyway is a bug in the caller.
    ///
    /// The slot is only claimed when a runtime is around to carry the
    /// request, so a failed dispatch never leaves the kind stuck busy.
    fn begin_fetch(&self, kind: DataKind) -> Result<Handle, FetchError> {
        if self.version < kind.min_protocol() {
            panic!(
                "{} fetch [proto/{}+] requested on proto/{}",
                kind,
                kind.min_protocol(),
                self.version
            );
        }
        let runtime = Handle::try_current().map_err(|err| {
            warn!(parent: &self.span, %kind, %err, "Fetch issued outside an async runtime");
            FetchError::NoRuntime(kind)
        })?;

        let flag = &self.busy[kind.index()];
        if flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(FetchError::AlreadyFetching(kind));
        }
        self.state.write().started[kind.index()] = Some(Instant::now());
        Ok(runtime)
    }

    /// Hand the request to the transport on its own task
    fn dispatch<F>(&self, runtime: &Handle, kind: DataKind, request: F)
    where
        F: Future<Output = Result<(), RemoteError>> + Send + 'static,
    {
        runtime.spawn(
            async move {
                if let Err(err) = request.await {
                    warn!(%kind, %err, "Request dispatch failed");
                }
            }
            .instrument(self.span.clone()),
        );
    }

    // ========================================================================
    // COMPLETION
    // ========================================================================

    /// Release the `kind` slot after `delivered` items arrived at
    /// `delivery_time`, folding the measurement into the rate tracker.
    ///
    /// Must follow every successful fetch exactly once, otherwise the slot
    /// stays busy until the next reset.
    pub fn set_idle(&self, kind: DataKind, delivered: usize, delivery_time: Instant) {
        let started = self.state.write().started[kind.index()].take();
        match started {
            Some(start) => {
                let elapsed = delivery_time.saturating_duration_since(start);
                self.rates.update(kind, elapsed, delivered);
                trace!(parent: &self.span, %kind, delivered, ?elapsed, "Fetch completed");
            }
            None => {
                debug!(parent: &self.span, %kind, "Idle signal without outstanding fetch");
            }
        }
        self.busy[kind.index()].store(false, Ordering::Release);
    }

    pub fn set_headers_idle(&self, delivered: usize, delivery_time: Instant) {
        self.set_idle(DataKind::Headers, delivered, delivery_time)
    }

    pub fn set_bodies_idle(&self, delivered: usize, delivery_time: Instant) {
        self.set_idle(DataKind::Bodies, delivered, delivery_time)
    }

    pub fn set_receipts_idle(&self, delivered: usize, delivery_time: Instant) {
        self.set_idle(DataKind::Receipts, delivered, delivery_time)
    }

    pub fn set_node_data_idle(&self, delivered: usize, delivery_time: Instant) {
        self.set_idle(DataKind::NodeData, delivered, delivery_time)
    }

    // ========================================================================
    // CAPACITY
    // ========================================================================

    /// Items of `kind` to ask for so the reply lands within `target_rtt`,
    /// never more than the protocol allows per request
    pub fn capacity(&self, kind: DataKind, target_rtt: Duration) -> usize {
        self.rates.capacity(kind, target_rtt).min(kind.max_fetch())
    }

    // ========================================================================
    // LACKING ITEMS
    // ========================================================================

    /// Remember that this peer does not have `hash`
    pub fn mark_lacking(&self, hash: Hash) {
        if let Some(evicted) = self.state.write().lacking.insert(hash) {
            trace!(parent: &self.span, evicted = %evicted.short(), "Lacking set full, dropped entry");
        }
    }

    /// Whether this peer is known not to have `hash`
    pub fn lacks(&self, hash: &Hash) -> bool {
        self.state.read().lacking.contains(hash)
    }

    pub fn lacking_count(&self) -> usize {
        self.state.read().lacking.len()
    }
}

impl fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let busy: Vec<DataKind> = DataKind::ALL
            .into_iter()
            .filter(|k| !self.is_idle(*k))
            .collect();
        f.debug_struct("PeerConnection")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("busy", &busy)
            .finish_non_exhaustive()
    }
}
