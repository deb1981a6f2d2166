// Rate Trackers - the common beat of a sync session
//
// Aggregates every tracked peer's estimates so newcomers can be seeded with
// realistic values and the orchestrator can size round-trips and timeouts.

use super::{
    RateTracker, RTT_MAX_ESTIMATE, RTT_MIN_CONFIDENCE, RTT_MIN_ESTIMATE, TTL_LIMIT, TTL_SCALING,
    TUNING_CONFIDENCE_CAP, TUNING_IMPACT,
};
use crate::primitives::DataKind;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace};

/// Rate tracker bookkeeping errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RateError {
    #[error("Already tracking peer {0}")]
    AlreadyTracking(String),

    #[error("Not tracking peer {0}")]
    NotTracking(String),
}

/// Set of per-peer rate trackers plus the tuned session-wide round-trip
#[derive(Debug)]
pub struct RateTrackers {
    trackers: HashMap<String, Arc<RateTracker>>,
    /// Current best guess at the overall round-trip
    roundtrip: Duration,
    /// Confidence in `roundtrip`, within [RTT_MIN_CONFIDENCE, 1]
    confidence: f64,
    /// Last time `roundtrip` was re-tuned
    tuned: Instant,
    /// Ceiling on computed request timeouts
    ttl_limit: Duration,
}

impl Default for RateTrackers {
    fn default() -> Self {
        Self::new()
    }
}

impl RateTrackers {
    pub fn new() -> Self {
        Self {
            trackers: HashMap::new(),
            roundtrip: RTT_MAX_ESTIMATE,
            confidence: 1.0,
            tuned: Instant::now(),
            ttl_limit: TTL_LIMIT,
        }
    }

    /// Override the request timeout ceiling
    pub fn with_ttl_limit(mut self, limit: Duration) -> Self {
        self.ttl_limit = limit;
        self
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    pub fn is_tracking(&self, id: &str) -> bool {
        self.trackers.contains_key(id)
    }

    /// Current confidence in the tuned round-trip
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Start tracking a peer. Joining lowers confidence, since a fresh peer
    /// may be slower than the current estimate assumes.
    pub fn track(&mut self, id: &str, tracker: Arc<RateTracker>) -> Result<(), RateError> {
        if self.trackers.contains_key(id) {
            return Err(RateError::AlreadyTracking(id.to_string()));
        }
        self.trackers.insert(id.to_string(), tracker);
        self.detune();
        Ok(())
    }

    /// Stop tracking a peer
    pub fn untrack(&mut self, id: &str) -> Result<Arc<RateTracker>, RateError> {
        self.trackers
            .remove(id)
            .ok_or_else(|| RateError::NotTracking(id.to_string()))
    }

    /// Per-kind capacity averaged over all tracked peers (zero when empty)
    pub fn mean_capacities(&self) -> [f64; 4] {
        let mut capacities = [0.0; 4];
        if self.trackers.is_empty() {
            return capacities;
        }
        for tracker in self.trackers.values() {
            for (sum, cap) in capacities.iter_mut().zip(tracker.capacities()) {
                *sum += cap;
            }
        }
        let count = self.trackers.len() as f64;
        for cap in capacities.iter_mut() {
            *cap /= count;
        }
        capacities
    }

    /// Mean capacity of a single kind across all tracked peers
    pub fn mean_capacity(&self, kind: DataKind) -> f64 {
        self.mean_capacities()[kind.index()]
    }

    /// Round-trip of the tracked peers, clamped to sane QoS bounds.
    ///
    /// Deliberately biased below the true median (index √n of the sorted
    /// list) so that a few slow peers do not drag the whole session down.
    pub fn median_round_trip(&self) -> Duration {
        let mut rtts: Vec<Duration> = self.trackers.values().map(|t| t.roundtrip()).collect();
        rtts.sort();

        let median = match rtts.len() {
            0 => RTT_MAX_ESTIMATE,
            1 => rtts[0],
            n => rtts[(n as f64).sqrt() as usize],
        };
        median.clamp(RTT_MIN_ESTIMATE, RTT_MAX_ESTIMATE)
    }

    /// Round-trip the orchestrator should aim each request at
    pub fn target_round_trip(&mut self) -> Duration {
        self.tune();
        self.roundtrip.mul_f64(0.9)
    }

    /// Timeout after which an outstanding request should be considered lost
    pub fn target_timeout(&mut self) -> Duration {
        self.tune();
        self.timeout()
    }

    fn timeout(&self) -> Duration {
        let timeout = self.roundtrip.mul_f64(TTL_SCALING / self.confidence);
        timeout.min(self.ttl_limit)
    }

    /// Pull the session round-trip towards the median, at most once per
    /// round-trip interval, and regain some confidence
    fn tune(&mut self) {
        if self.tuned.elapsed() < self.roundtrip {
            return;
        }
        self.tuned = Instant::now();

        let median = self.median_round_trip();
        let rtt = (1.0 - TUNING_IMPACT) * self.roundtrip.as_secs_f64()
            + TUNING_IMPACT * median.as_secs_f64();
        self.roundtrip = Duration::from_secs_f64(rtt);
        self.confidence += (1.0 - self.confidence) / 2.0;

        trace!(
            rtt = ?self.roundtrip,
            confidence = self.confidence,
            ttl = ?self.timeout(),
            "Recalculated session round-trip"
        );
    }

    fn detune(&mut self) {
        let peers = self.trackers.len();
        if peers == 1 {
            self.confidence = 1.0;
            return;
        }
        // Plenty of peers left to retain throughput
        if peers >= TUNING_CONFIDENCE_CAP {
            return;
        }
        self.confidence *= (peers - 1) as f64 / peers as f64;
        if self.confidence < RTT_MIN_CONFIDENCE {
            self.confidence = RTT_MIN_CONFIDENCE;
        }
        debug!(peers, confidence = self.confidence, "Lowered round-trip confidence");
    }
}
