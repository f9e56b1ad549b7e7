//! Cache Tier Definitions
//!
//! Defines the two-tier hierarchy and the per-cache configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// =============================================================================
// Cache Tier
// =============================================================================

/// Cache tier in lookup order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    /// L1: bounded in-process store
    #[default]
    L1Memory,
    /// L2: pluggable remote store, possibly shared across instances
    L2Remote,
}

impl CacheTier {
    /// Get tier priority (lower is consulted first)
    pub fn priority(&self) -> u8 {
        match self {
            CacheTier::L1Memory => 0,
            CacheTier::L2Remote => 1,
        }
    }

    /// Get all tiers in lookup order (L1 -> L2)
    pub fn lookup_order() -> &'static [CacheTier] {
        &[CacheTier::L1Memory, CacheTier::L2Remote]
    }
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheTier::L1Memory => write!(f, "L1-Memory"),
            CacheTier::L2Remote => write!(f, "L2-Remote"),
        }
    }
}

// =============================================================================
// Cache Configuration
// =============================================================================

/// Configuration for one tiered cache instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether the in-process tier is used
    pub l1_enabled: bool,
    /// Whether the remote tier is consulted (needs a configured remote)
    pub l2_enabled: bool,
    /// Maximum L1 entry count
    pub capacity: usize,
    /// TTL applied when a write carries none
    pub default_ttl_ms: u64,
    /// Period of the background L1 expiry sweep (0 disables it)
    pub sweep_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_enabled: true,
            l2_enabled: false,
            capacity: 1000,
            default_ttl_ms: 5 * 60 * 1000,
            sweep_interval_ms: 60 * 1000,
        }
    }
}

impl CacheConfig {
    /// L1-only configuration with the given capacity and default TTL
    pub fn l1_only(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            capacity,
            default_ttl_ms: default_ttl.as_millis() as u64,
            ..Default::default()
        }
    }

    pub fn with_l2(mut self) -> Self {
        self.l2_enabled = true;
        self
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_ms > 0).then(|| Duration::from_millis(self.sweep_interval_ms))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.l1_enabled && self.capacity == 0 {
            return Err(Error::Configuration(
                "cache capacity must be greater than zero".into(),
            ));
        }
        if self.default_ttl_ms == 0 {
            return Err(Error::Configuration(
                "cache default_ttl_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
