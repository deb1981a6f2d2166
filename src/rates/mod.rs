// Rates module - HOW FAST PEERS ARE
// Per-peer throughput estimation and the cross-peer aggregate used to seed
// newcomers and size request timeouts

mod tracker;
mod trackers;

pub use tracker::RateTracker;
pub use trackers::{RateError, RateTrackers};

use std::time::Duration;

/// Weight of a fresh measurement in the moving averages
pub(crate) const MEASUREMENT_IMPACT: f64 = 0.1;

/// Slight overestimate applied to capacities so peers are nudged to grow
pub(crate) const CAPACITY_OVERESTIMATION: f64 = 1.01;

/// Lower bound of the round-trip estimate, irrelevant of the measured value
pub const RTT_MIN_ESTIMATE: Duration = Duration::from_secs(2);

/// Upper bound of the round-trip estimate, irrelevant of the measured value
pub const RTT_MAX_ESTIMATE: Duration = Duration::from_secs(20);

/// Lowest confidence the aggregate may fall to
pub(crate) const RTT_MIN_CONFIDENCE: f64 = 0.1;

/// Multiplier from round-trip to request timeout
pub(crate) const TTL_SCALING: f64 = 3.0;

/// Default ceiling on request timeouts
pub const TTL_LIMIT: Duration = Duration::from_secs(60);

/// Peer count above which joins no longer lower confidence
pub(crate) const TUNING_CONFIDENCE_CAP: usize = 10;

/// Weight of the median in each re-tuning step
pub(crate) const TUNING_IMPACT: f64 = 0.25;
