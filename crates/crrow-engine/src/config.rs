//! Engine configuration.

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Tunables of a replica.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rewrite the clock entry when a remote write ties on both version and
    /// value, instead of treating it as already converged.
    pub merge_equal_values: bool,
    /// Stamp rows that already exist when a table becomes tracked.
    pub backfill_on_track: bool,
    /// Remember the highest db version merged from each peer.
    pub track_seen_peers: bool,
    /// Target number of records per batch for batched extraction.
    pub max_batch_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            merge_equal_values: false,
            backfill_on_track: true,
            track_seen_peers: true,
            max_batch_size: 1000,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Builder for engine configuration.
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    pub fn merge_equal_values(mut self, enabled: bool) -> Self {
        self.config.merge_equal_values = enabled;
        self
    }

    pub fn backfill_on_track(mut self, enabled: bool) -> Self {
        self.config.backfill_on_track = enabled;
        self
    }

    pub fn track_seen_peers(mut self, enabled: bool) -> Self {
        self.config.track_seen_peers = enabled;
        self
    }

    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.config.max_batch_size = size.max(1);
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
