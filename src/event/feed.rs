// Feed - fan-out of values to any number of subscriber channels
//
// Each subscriber hands in its own bounded Tokio channel. Delivery uses
// try_send: a full queue loses that one value, a closed queue is pruned.
// Publishing therefore never waits on a subscriber.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{trace, warn};

struct Subscriber<T> {
    id: u64,
    tx: mpsc::Sender<T>,
}

struct FeedInner<T> {
    name: &'static str,
    subscribers: Mutex<Vec<Subscriber<T>>>,
    next_id: AtomicU64,
    dropped: AtomicU64,
}

trait Detach: Send + Sync {
    fn detach(&self, id: u64);
}

impl<T: Send> Detach for FeedInner<T> {
    fn detach(&self, id: u64) {
        self.subscribers.lock().retain(|s| s.id != id);
    }
}

/// Broadcast point delivering clones of each sent value to every subscriber
pub struct Feed<T> {
    inner: Arc<FeedInner<T>>,
}

impl<T: Clone + Send + 'static> Feed<T> {
    /// Create a feed; `name` only shows up in logs
    pub fn new(name: &'static str) -> Self {
        Self {
            inner: Arc::new(FeedInner {
                name,
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Add `tx` as a subscriber until the returned handle is dropped or
    /// unsubscribed
    pub fn subscribe(&self, tx: mpsc::Sender<T>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.lock().push(Subscriber { id, tx });
        trace!(feed = self.inner.name, id, "Subscriber added");

        let inner: Arc<dyn Detach> = self.inner.clone();
        Subscription {
            id,
            feed: Some(Arc::downgrade(&inner)),
        }
    }

    /// Deliver `value` to every live subscriber without blocking.
    ///
    /// Returns how many subscribers accepted it.
    pub fn send(&self, value: T) -> usize {
        let mut subscribers = self.inner.subscribers.lock();
        let mut delivered = 0;

        subscribers.retain(|sub| match sub.tx.try_send(value.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(feed = self.inner.name, id = sub.id, "Subscriber queue full, event dropped");
                true
            }
            Err(TrySendError::Closed(_)) => {
                trace!(feed = self.inner.name, id = sub.id, "Subscriber gone, pruning");
                false
            }
        });

        delivered
    }

    /// Number of currently attached subscribers
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Total values lost to full subscriber queues
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

/// Revocable handle on a feed subscription. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    feed: Option<Weak<dyn Detach>>,
}

impl Subscription {
    /// Detach from the feed; no further values are delivered
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    /// Whether the feed still exists and this handle is attached to it
    pub fn is_active(&self) -> bool {
        self.feed
            .as_ref()
            .map(|weak| weak.strong_count() > 0)
            .unwrap_or(false)
    }

    fn detach(&mut self) {
        if let Some(feed) = self.feed.take().and_then(|weak| weak.upgrade()) {
            feed.detach(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
