// Primitives module - THE VOCABULARY
// Item identifiers and the data kinds a sync session schedules independently

mod hash;
mod kind;

pub use hash::{Hash, HashParseError};
pub use kind::{
    DataKind, MAX_BODY_FETCH, MAX_HEADER_FETCH, MAX_RECEIPT_FETCH, MAX_STATE_FETCH,
};
