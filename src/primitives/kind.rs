// Data Kinds - independently scheduled categories of retrievable content

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of headers requested in one fetch
pub const MAX_HEADER_FETCH: usize = 192;
/// Maximum number of block bodies requested in one fetch
pub const MAX_BODY_FETCH: usize = 128;
/// Maximum number of receipt sets requested in one fetch
pub const MAX_RECEIPT_FETCH: usize = 256;
/// Maximum number of state trie nodes requested in one fetch
pub const MAX_STATE_FETCH: usize = 384;

/// A category of chain data a peer can be asked for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataKind {
    Headers,
    Bodies,
    Receipts,
    NodeData,
}

impl DataKind {
    /// Every kind, in slot order
    pub const ALL: [DataKind; 4] = [
        DataKind::Headers,
        DataKind::Bodies,
        DataKind::Receipts,
        DataKind::NodeData,
    ];

    /// Slot of this kind in per-kind arrays
    pub fn index(self) -> usize {
        match self {
            DataKind::Headers => 0,
            DataKind::Bodies => 1,
            DataKind::Receipts => 2,
            DataKind::NodeData => 3,
        }
    }

    /// Lowest negotiated protocol version able to serve this kind
    pub fn min_protocol(self) -> u32 {
        match self {
            DataKind::Headers | DataKind::Bodies => 62,
            DataKind::Receipts | DataKind::NodeData => 63,
        }
    }

    /// Ceiling on items per request, independent of measured throughput
    pub fn max_fetch(self) -> usize {
        match self {
            DataKind::Headers => MAX_HEADER_FETCH,
            DataKind::Bodies => MAX_BODY_FETCH,
            DataKind::Receipts => MAX_RECEIPT_FETCH,
            DataKind::NodeData => MAX_STATE_FETCH,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DataKind::Headers => "headers",
            DataKind::Bodies => "bodies",
            DataKind::Receipts => "receipts",
            DataKind::NodeData => "node-data",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
