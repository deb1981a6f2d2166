// Peer Set Configuration

use super::lacking::MAX_LACKING_HASHES;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Tunables of a peer set
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSetConfig {
    /// Cap on each peer's lacking set
    pub max_lacking_hashes: usize,
    /// Lowest protocol version eligible for the per-kind idle queries
    pub min_protocol: u32,
    /// Highest protocol version eligible for the per-kind idle queries
    pub max_protocol: u32,
    /// Ceiling on the suggested request timeout, in seconds
    pub ttl_limit_secs: u64,
}

impl Default for PeerSetConfig {
    fn default() -> Self {
        Self {
            max_lacking_hashes: MAX_LACKING_HASHES,
            min_protocol: 63,
            max_protocol: 65,
            ttl_limit_secs: 60,
        }
    }
}

impl PeerSetConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_lacking_hashes(mut self, max: usize) -> Self {
        self.max_lacking_hashes = max;
        self
    }

    pub fn with_protocol_range(mut self, min: u32, max: u32) -> Self {
        self.min_protocol = min;
        self.max_protocol = max;
        self
    }

    pub fn with_ttl_limit_secs(mut self, secs: u64) -> Self {
        self.ttl_limit_secs = secs;
        self
    }

    pub fn ttl_limit(&self) -> Duration {
        Duration::from_secs(self.ttl_limit_secs)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_lacking_hashes == 0 {
            return Err(ConfigError::Invalid(
                "max_lacking_hashes cannot be 0".to_string(),
            ));
        }
        if self.min_protocol > self.max_protocol {
            return Err(ConfigError::Invalid(format!(
                "protocol range {}..={} is empty",
                self.min_protocol, self.max_protocol
            )));
        }
        if self.ttl_limit_secs == 0 {
            return Err(ConfigError::Invalid("ttl_limit_secs cannot be 0".to_string()));
        }
        Ok(())
    }
}
