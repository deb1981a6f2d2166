// Rate Tracker - one peer's delivery throughput, per data kind
//
// Capacities are items per second, kept as exponential moving averages so a
// single slow or fast reply nudges the estimate instead of replacing it.

use super::{CAPACITY_OVERESTIMATION, MEASUREMENT_IMPACT};
use crate::primitives::DataKind;
use parking_lot::RwLock;
use std::time::Duration;

#[derive(Clone, Debug)]
struct Estimates {
    capacity: [f64; 4],
    roundtrip: Duration,
}

/// Throughput and round-trip estimator for a single peer
#[derive(Debug)]
pub struct RateTracker {
    inner: RwLock<Estimates>,
}

impl RateTracker {
    /// Create a tracker seeded with per-kind capacities and a round-trip guess
    pub fn new(capacity: [f64; 4], roundtrip: Duration) -> Self {
        Self {
            inner: RwLock::new(Estimates {
                capacity,
                roundtrip,
            }),
        }
    }

    /// Estimated number of items deliverable within `target_rtt`.
    ///
    /// Never below 1, so even an unmeasured peer gets a minimal request.
    pub fn capacity(&self, kind: DataKind, target_rtt: Duration) -> usize {
        let capacity = self.inner.read().capacity[kind.index()];
        let throughput = capacity * target_rtt.as_secs_f64();
        round_capacity(1.0 + CAPACITY_OVERESTIMATION * throughput)
    }

    /// Fold a delivery of `items` that took `elapsed` into the estimates
    pub fn update(&self, kind: DataKind, elapsed: Duration, items: usize) {
        let mut inner = self.inner.write();

        // Nothing delivered (timeout or unavailable data): drop to minimum
        if items == 0 {
            inner.capacity[kind.index()] = 0.0;
            return;
        }
        let elapsed = elapsed.max(Duration::from_nanos(1));
        let measured = items as f64 / elapsed.as_secs_f64();

        let slot = &mut inner.capacity[kind.index()];
        *slot = (1.0 - MEASUREMENT_IMPACT) * *slot + MEASUREMENT_IMPACT * measured;

        let rtt = (1.0 - MEASUREMENT_IMPACT) * inner.roundtrip.as_secs_f64()
            + MEASUREMENT_IMPACT * elapsed.as_secs_f64();
        inner.roundtrip = Duration::from_secs_f64(rtt);
    }

    /// Raw items-per-second estimate for `kind`
    pub fn raw_capacity(&self, kind: DataKind) -> f64 {
        self.inner.read().capacity[kind.index()]
    }

    /// Snapshot of all per-kind capacities
    pub fn capacities(&self) -> [f64; 4] {
        self.inner.read().capacity
    }

    /// Current round-trip estimate
    pub fn roundtrip(&self) -> Duration {
        self.inner.read().roundtrip
    }

    /// Replace the estimates wholesale, used when a tracker joins a set
    pub fn reseed(&self, capacity: [f64; 4], roundtrip: Duration) {
        let mut inner = self.inner.write();
        inner.capacity = capacity;
        inner.roundtrip = roundtrip;
    }
}

impl Default for RateTracker {
    fn default() -> Self {
        Self::new([0.0; 4], super::RTT_MAX_ESTIMATE)
    }
}

fn round_capacity(capacity: f64) -> usize {
    const MAX_INT32: f64 = i32::MAX as f64;
    capacity.ceil().clamp(1.0, MAX_INT32) as usize
}
