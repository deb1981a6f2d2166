// syncpeers - peer bookkeeping and request scheduling for block sync
//
// Tracks the peers of a sync session, keeps at most one request per data
// kind in flight to each of them, ranks them by measured throughput and
// remembers what each one is known not to have.

pub mod downloader;
pub mod event;
pub mod primitives;
pub mod rates;

pub use downloader::{
    FetchError, MockRemotePeer, PeerConnection, PeerSet, PeerSetConfig, PeerSetError,
    RemotePeer,
};
pub use primitives::{DataKind, Hash};
