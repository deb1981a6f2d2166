// Downloader module - WHO TO ASK, AND FOR WHAT
// Peer sessions, the peer set that ranks them, and the remote capability
// requests are handed to

mod config;
mod lacking;
mod peer;
mod peer_set;
mod remote;

pub use config::{ConfigError, PeerSetConfig};
pub use lacking::{LackingSet, MAX_LACKING_HASHES};
pub use peer::{FetchError, PeerConnection};
pub use peer_set::{PeerSet, PeerSetError, PeerSetStats};
pub use remote::{MockRemotePeer, RemoteError, RemotePeer, Request};
