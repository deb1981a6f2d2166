// Peer Connection Tests
// Tests for per-kind fetch scheduling, completion, capacity and lacking items

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use syncpeers::downloader::{
    FetchError, MockRemotePeer, PeerConnection, RemoteError, RemotePeer, Request,
};
use syncpeers::primitives::{DataKind, Hash};
use tokio::sync::mpsc;

fn peer_with_channel(
    version: u32,
) -> (
    PeerConnection,
    Arc<MockRemotePeer>,
    mpsc::UnboundedReceiver<(String, Request)>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let remote = Arc::new(MockRemotePeer::new("remote").with_forwarder(tx));
    (PeerConnection::new("remote", version, remote.clone()), remote, rx)
}

/// Transport whose requests are accepted but never finish sending
#[derive(Default)]
struct StalledRemote {
    started: AtomicUsize,
}

impl StalledRemote {
    async fn stall(&self) -> Result<(), RemoteError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<()>().await;
        Ok(())
    }
}

#[async_trait]
impl RemotePeer for StalledRemote {
    fn head(&self) -> (Hash, u128) {
        (Hash::ZERO, 0)
    }

    async fn request_headers_by_hash(
        &self,
        _origin: Hash,
        _amount: usize,
        _skip: usize,
        _reverse: bool,
    ) -> Result<(), RemoteError> {
        self.stall().await
    }

    async fn request_headers_by_number(
        &self,
        _origin: u64,
        _amount: usize,
        _skip: usize,
        _reverse: bool,
    ) -> Result<(), RemoteError> {
        self.stall().await
    }

    async fn request_bodies(&self, _hashes: Vec<Hash>) -> Result<(), RemoteError> {
        self.stall().await
    }

    async fn request_receipts(&self, _hashes: Vec<Hash>) -> Result<(), RemoteError> {
        self.stall().await
    }

    async fn request_node_data(&self, _hashes: Vec<Hash>) -> Result<(), RemoteError> {
        self.stall().await
    }
}

// ============================================================================
// FETCHING
// ============================================================================

#[tokio::test]
async fn test_fetch_headers_forwards_by_number() {
    let (peer, _remote, mut rx) = peer_with_channel(64);

    peer.fetch_headers(100, 64).unwrap();

    let (id, request) = rx.recv().await.unwrap();
    assert_eq!(id, "remote");
    assert_eq!(
        request,
        Request::HeadersByNumber {
            origin: 100,
            amount: 64,
            skip: 0,
            reverse: false
        }
    );
}

#[tokio::test]
async fn test_fetch_headers_by_hash_forwards_arguments() {
    let (peer, _remote, mut rx) = peer_with_channel(64);
    let origin = Hash::from_low_u64(9);

    peer.fetch_headers_by_hash(origin, 1, 0, true).unwrap();

    let (_, request) = rx.recv().await.unwrap();
    assert_eq!(
        request,
        Request::HeadersByHash {
            origin,
            amount: 1,
            skip: 0,
            reverse: true
        }
    );
}

#[tokio::test]
async fn test_fetch_hash_lists_forwarded() {
    let (peer, _remote, mut rx) = peer_with_channel(65);
    let hashes: Vec<Hash> = (0..3).map(Hash::from_low_u64).collect();

    peer.fetch_bodies(hashes.clone()).unwrap();
    peer.fetch_receipts(hashes.clone()).unwrap();
    peer.fetch_node_data(hashes.clone()).unwrap();

    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(rx.recv().await.unwrap().1);
    }
    assert!(seen.contains(&Request::Bodies(hashes.clone())));
    assert!(seen.contains(&Request::Receipts(hashes.clone())));
    assert!(seen.contains(&Request::NodeData(hashes)));
}

#[tokio::test]
async fn test_second_fetch_leaves_state_untouched() {
    let (peer, remote, mut rx) = peer_with_channel(64);
    peer.fetch_headers(0, 10).unwrap();
    rx.recv().await.unwrap();

    let started = peer.started_at(DataKind::Headers);
    let capacities = peer.rates().capacities();
    let roundtrip = peer.rates().roundtrip();

    assert_eq!(
        peer.fetch_headers(10, 10),
        Err(FetchError::AlreadyFetching(DataKind::Headers))
    );
    assert_eq!(
        peer.fetch_headers_by_hash(Hash::ZERO, 1, 0, false),
        Err(FetchError::AlreadyFetching(DataKind::Headers))
    );

    assert_eq!(peer.started_at(DataKind::Headers), started);
    assert_eq!(peer.rates().capacities(), capacities);
    assert_eq!(peer.rates().roundtrip(), roundtrip);
    tokio::task::yield_now().await;
    assert_eq!(remote.request_count(), 1);
}

#[tokio::test]
async fn test_fetch_returns_while_transport_stalls() {
    let remote = Arc::new(StalledRemote::default());
    let peer = PeerConnection::new("stalled", 64, remote.clone());

    let result = tokio::time::timeout(Duration::from_millis(100), async {
        peer.fetch_bodies(vec![Hash::ZERO])
    })
    .await;
    assert_eq!(result, Ok(Ok(())));
    assert!(!peer.is_idle(DataKind::Bodies));

    // The request is in flight on its own task and never completes
    while remote.started.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    assert!(!peer.is_idle(DataKind::Bodies));
}

#[tokio::test]
async fn test_dispatch_failure_not_reported_to_caller() {
    let (peer, remote, _rx) = peer_with_channel(64);
    remote.disconnect();

    assert!(peer.fetch_bodies(vec![Hash::ZERO]).is_ok());
    assert!(!peer.is_idle(DataKind::Bodies));
}

#[test]
fn test_fetch_outside_runtime_rejected() {
    let (peer, remote, _rx) = peer_with_channel(65);

    assert_eq!(
        peer.fetch_receipts(vec![Hash::ZERO]),
        Err(FetchError::NoRuntime(DataKind::Receipts))
    );
    assert!(peer.is_idle(DataKind::Receipts));
    assert_eq!(remote.request_count(), 0);
}

#[test]
#[should_panic(expected = "headers fetch [proto/62+] requested on proto/61")]
fn test_headers_below_floor_panics() {
    let remote = Arc::new(MockRemotePeer::new("old"));
    let peer = PeerConnection::new("old", 61, remote);
    let _ = peer.fetch_headers(0, 1);
}

#[test]
#[should_panic(expected = "node-data fetch")]
fn test_node_data_below_floor_panics() {
    let remote = Arc::new(MockRemotePeer::new("old"));
    let peer = PeerConnection::new("old", 62, remote);
    let _ = peer.fetch_node_data(vec![]);
}

// ============================================================================
// COMPLETION
// ============================================================================

#[tokio::test]
async fn test_fetch_idle_fetch_cycle() {
    let (peer, _remote, _rx) = peer_with_channel(64);

    peer.fetch_headers(0, 100).unwrap();
    assert!(peer.fetch_headers(0, 100).is_err());

    peer.set_headers_idle(100, Instant::now());
    assert!(peer.is_idle(DataKind::Headers));

    assert!(peer.fetch_headers(100, 100).is_ok());
}

#[tokio::test]
async fn test_set_idle_updates_rates() {
    let (peer, _remote, _rx) = peer_with_channel(64);

    peer.fetch_receipts(vec![]).unwrap();
    let start = peer.started_at(DataKind::Receipts).unwrap();
    peer.set_receipts_idle(50, start + Duration::from_millis(500));

    // 50 items in 0.5s = 100/s, at impact 0.1
    let capacity = peer.rates().raw_capacity(DataKind::Receipts);
    assert!((capacity - 10.0).abs() < 1e-6, "capacity {capacity}");
    assert_eq!(peer.rates().raw_capacity(DataKind::Headers), 0.0);
}

#[tokio::test]
async fn test_zero_delivery_drops_capacity() {
    let (peer, _remote, _rx) = peer_with_channel(64);
    peer.rates().reseed([40.0; 4], Duration::from_secs(2));

    peer.fetch_bodies(vec![Hash::ZERO]).unwrap();
    peer.set_bodies_idle(0, Instant::now());

    assert_eq!(peer.rates().raw_capacity(DataKind::Bodies), 0.0);
    assert_eq!(peer.capacity(DataKind::Bodies, Duration::from_secs(1)), 1);
}

#[test]
fn test_set_idle_without_fetch_is_harmless() {
    let remote = Arc::new(MockRemotePeer::new("idle"));
    let peer = PeerConnection::new("idle", 64, remote);

    peer.set_node_data_idle(10, Instant::now());

    assert!(peer.is_idle(DataKind::NodeData));
    assert_eq!(peer.rates().raw_capacity(DataKind::NodeData), 0.0);
}

// ============================================================================
// CAPACITY
// ============================================================================

#[test]
fn test_capacity_below_ceiling_passes_through() {
    let remote = Arc::new(MockRemotePeer::new("cap"));
    let peer = PeerConnection::new("cap", 64, remote);
    peer.rates().reseed([20.0; 4], Duration::from_secs(1));

    // ceil(1 + 1.01 * 20 * 2) = 42
    assert_eq!(peer.capacity(DataKind::Headers, Duration::from_secs(2)), 42);
}

#[test]
fn test_capacity_ceilings_per_kind() {
    let remote = Arc::new(MockRemotePeer::new("cap"));
    let peer = PeerConnection::new("cap", 64, remote);
    peer.rates().reseed([10_000.0; 4], Duration::from_secs(1));
    let rtt = Duration::from_secs(1);

    assert_eq!(peer.capacity(DataKind::Headers, rtt), 192);
    assert_eq!(peer.capacity(DataKind::Bodies, rtt), 128);
    assert_eq!(peer.capacity(DataKind::Receipts, rtt), 256);
    assert_eq!(peer.capacity(DataKind::NodeData, rtt), 384);
}

// ============================================================================
// LACKING ITEMS & RESET
// ============================================================================

#[test]
fn test_mark_lacking_and_lacks() {
    let remote = Arc::new(MockRemotePeer::new("l"));
    let peer = PeerConnection::new("l", 64, remote);

    peer.mark_lacking(Hash::from_low_u64(1));

    assert!(peer.lacks(&Hash::from_low_u64(1)));
    assert!(!peer.lacks(&Hash::from_low_u64(2)));
}

#[test]
fn test_lacking_capacity_override() {
    let remote = Arc::new(MockRemotePeer::new("l"));
    let peer = PeerConnection::new("l", 64, remote).with_lacking_capacity(3);

    for n in 0..10 {
        peer.mark_lacking(Hash::from_low_u64(n));
    }
    assert_eq!(peer.lacking_count(), 3);
    assert!(peer.lacks(&Hash::from_low_u64(9)));
}

#[test]
fn test_mark_lacking_overflow_by_one() {
    let remote = Arc::new(MockRemotePeer::new("l"));
    let peer = PeerConnection::new("l", 64, remote);

    for n in 0..4097 {
        peer.mark_lacking(Hash::from_low_u64(n));
    }

    assert_eq!(peer.lacking_count(), 4096);
    assert!(peer.lacks(&Hash::from_low_u64(4096)));
    let gone = (0..4096)
        .filter(|n| !peer.lacks(&Hash::from_low_u64(*n)))
        .count();
    assert_eq!(gone, 1);
}

#[tokio::test]
async fn test_reset_restores_idle_and_forgets_lacking() {
    let (peer, _remote, _rx) = peer_with_channel(65);
    peer.fetch_headers(0, 1).unwrap();
    peer.fetch_bodies(vec![]).unwrap();
    peer.fetch_receipts(vec![]).unwrap();
    peer.fetch_node_data(vec![]).unwrap();
    let marked: Vec<Hash> = (0..32).map(Hash::from_low_u64).collect();
    for hash in &marked {
        peer.mark_lacking(*hash);
    }

    peer.reset();

    for kind in DataKind::ALL {
        assert!(peer.is_idle(kind));
        assert!(peer.started_at(kind).is_none());
    }
    assert!(marked.iter().all(|h| !peer.lacks(h)));
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_fetches_single_winner() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let remote = Arc::new(MockRemotePeer::new("race").with_forwarder(tx));
    let peer = Arc::new(PeerConnection::new("race", 64, remote));

    let mut handles = Vec::new();
    for i in 0..32u64 {
        let peer = peer.clone();
        handles.push(tokio::spawn(async move { peer.fetch_headers(i, 1).is_ok() }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[test]
fn test_head_reported_by_remote() {
    let head = Hash::from_low_u64(77);
    let remote = Arc::new(MockRemotePeer::new("h").with_head(head, 1_000));
    let peer = PeerConnection::new("h", 64, remote);
    assert_eq!(peer.head(), (head, 1_000));
}
