// Event module - WHO WANTS TO KNOW
// One-to-many fan-out of session events to independent subscriber queues

mod feed;

pub use feed::{Feed, Subscription};
