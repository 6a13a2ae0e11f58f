//! Response cache configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the semantic response cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether response caching is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Fingerprint similarity required for a hit (0.0 to 1.0).
    /// The exact threshold is a tunable; 0.95 keeps paraphrase hits
    /// while rejecting merely-related prompts.
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,

    /// Maximum number of rows kept; the least recently used row is
    /// evicted on store once full
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Rows unused for longer than this are removed by cleanup
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_min_similarity() -> f32 {
    0.95
}

fn default_max_entries() -> usize {
    5000
}

fn default_ttl_secs() -> u64 {
    86_400
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            min_similarity: default_min_similarity(),
            max_entries: default_max_entries(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_min_similarity(mut self, threshold: f32) -> Self {
        self.min_similarity = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_secs = ttl.as_secs();
        self
    }
}
