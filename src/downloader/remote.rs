// Remote Peer - the transport side of a sync session
//
// Requests are fire-and-forget: a returned Ok only means the request left,
// replies arrive on a path this crate does not model.

use crate::primitives::Hash;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors raised while handing a request to the transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Peer disconnected")]
    Disconnected,

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Capability to issue data requests to one remote node
#[async_trait]
pub trait RemotePeer: Send + Sync {
    /// Best known block hash and total difficulty reported by the peer
    fn head(&self) -> (Hash, u128);

    async fn request_headers_by_hash(
        &self,
        origin: Hash,
        amount: usize,
        skip: usize,
        reverse: bool,
    ) -> Result<(), RemoteError>;

    async fn request_headers_by_number(
        &self,
        origin: u64,
        amount: usize,
        skip: usize,
        reverse: bool,
    ) -> Result<(), RemoteError>;

    async fn request_bodies(&self, hashes: Vec<Hash>) -> Result<(), RemoteError>;

    async fn request_receipts(&self, hashes: Vec<Hash>) -> Result<(), RemoteError>;

    async fn request_node_data(&self, hashes: Vec<Hash>) -> Result<(), RemoteError>;
}

/// A request as seen by the remote side
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    HeadersByHash {
        origin: Hash,
        amount: usize,
        skip: usize,
        reverse: bool,
    },
    HeadersByNumber {
        origin: u64,
        amount: usize,
        skip: usize,
        reverse: bool,
    },
    Bodies(Vec<Hash>),
    Receipts(Vec<Hash>),
    NodeData(Vec<Hash>),
}

impl Request {
    /// Number of items asked for
    pub fn len(&self) -> usize {
        match self {
            Request::HeadersByHash { amount, .. } | Request::HeadersByNumber { amount, .. } => {
                *amount
            }
            Request::Bodies(h) | Request::Receipts(h) | Request::NodeData(h) => h.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// MOCK REMOTE PEER
// ============================================================================

/// In-memory remote that records requests and optionally forwards them
pub struct MockRemotePeer {
    id: String,
    head: (Hash, u128),
    requests: Mutex<Vec<Request>>,
    forward: Option<mpsc::UnboundedSender<(String, Request)>>,
    disconnected: AtomicBool,
}

impl MockRemotePeer {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            head: (Hash::ZERO, 0),
            requests: Mutex::new(Vec::new()),
            forward: None,
            disconnected: AtomicBool::new(false),
        }
    }

    /// Report this head from `head()`
    pub fn with_head(mut self, hash: Hash, total_difficulty: u128) -> Self {
        self.head = (hash, total_difficulty);
        self
    }

    /// Also push every request, tagged with the peer id, into `tx`
    pub fn with_forwarder(mut self, tx: mpsc::UnboundedSender<(String, Request)>) -> Self {
        self.forward = Some(tx);
        self
    }

    /// Make every further request fail as if the link dropped
    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    fn record(&self, request: Request) -> Result<(), RemoteError> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(RemoteError::Disconnected);
        }
        self.requests.lock().push(request.clone());
        if let Some(tx) = &self.forward {
            tx.send((self.id.clone(), request))
                .map_err(|e| RemoteError::Transport(e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl RemotePeer for MockRemotePeer {
    fn head(&self) -> (Hash, u128) {
        self.head
    }

    async fn request_headers_by_hash(
        &self,
        origin: Hash,
        amount: usize,
        skip: usize,
        reverse: bool,
    ) -> Result<(), RemoteError> {
        self.record(Request::HeadersByHash {
            origin,
            amount,
            skip,
            reverse,
        })
    }

    async fn request_headers_by_number(
        &self,
        origin: u64,
        amount: usize,
        skip: usize,
        reverse: bool,
    ) -> Result<(), RemoteError> {
        self.record(Request::HeadersByNumber {
            origin,
            amount,
            skip,
            reverse,
        })
    }

    async fn request_bodies(&self, hashes: Vec<Hash>) -> Result<(), RemoteError> {
        self.record(Request::Bodies(hashes))
    }

    async fn request_receipts(&self, hashes: Vec<Hash>) -> Result<(), RemoteError> {
        self.record(Request::Receipts(hashes))
    }

    async fn request_node_data(&self, hashes: Vec<Hash>) -> Result<(), RemoteError> {
        self.record(Request::NodeData(hashes))
    }
}
