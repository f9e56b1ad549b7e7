//! Tiered Caching System
//!
//! A two-tier cache of opaque byte values keyed by strings:
//! - **L1 Memory**: bounded in-process store, strict LRU plus per-entry TTL
//! - **L2 Remote**: optional pluggable store, consulted on L1 miss
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           TieredCache                                │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────────────┐        ┌──────────────────────────┐   │
//! │  │  L1 LruTtlStore          │  miss  │  L2 RemoteTier           │   │
//! │  │  (Mutex<IndexMap>)       │ ─────▶ │  (shared, best-effort)   │   │
//! │  │  capacity + TTL          │ ◀───── │  errors degrade to miss  │   │
//! │  └──────────────────────────┘backfill└──────────────────────────┘   │
//! │         ▲                                                           │
//! │         │ periodic sweep (CancellationToken)                        │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  CacheMetrics: hits • misses • evictions • expirations • l2 errors  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use provider_gateway::cache::{CacheConfig, CacheKey, TieredCache};
//! use bytes::Bytes;
//!
//! let cache = TieredCache::new(CacheConfig::default(), None)?;
//!
//! let key = CacheKey::new("alpha", "search").arg("rust").to_storage_key();
//! cache.set(&key, Bytes::from("{}"), None).await;
//!
//! match cache.lookup(&key).await {
//!     CacheLookup::Hit { value, tier } => println!("{} bytes from {}", value.len(), tier),
//!     CacheLookup::Miss => println!("not cached"),
//! }
//!
//! println!("hit rate: {:.2}", cache.stats().hit_rate);
//! ```

pub mod entry;
pub mod lru;
pub mod manager;
pub mod metrics;
pub mod storage;
pub mod tier;

// Re-export main types
pub use entry::{compile_key_pattern, CacheEntry, CacheKey};
pub use lru::LruTtlStore;
pub use manager::TieredCache;
pub use metrics::{CacheMetrics, CacheStats};
pub use storage::{RemoteTier, SharedMemoryTier, SharedRemoteTier};
pub use tier::{CacheConfig, CacheTier};

use bytes::Bytes;

// =============================================================================
// Cache Lookup Result
// =============================================================================

/// Result of a cache lookup operation
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// Cache hit with data and source tier
    Hit {
        /// The cached value
        value: Bytes,
        /// Tier that served the value
        tier: CacheTier,
    },
    /// Not found in any tier
    Miss,
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit { .. })
    }

    pub fn is_miss(&self) -> bool {
        matches!(self, CacheLookup::Miss)
    }

    /// Get the tier if this is a hit
    pub fn tier(&self) -> Option<CacheTier> {
        match self {
            CacheLookup::Hit { tier, .. } => Some(*tier),
            CacheLookup::Miss => None,
        }
    }

    pub fn into_value(self) -> Option<Bytes> {
        match self {
            CacheLookup::Hit { value, .. } => Some(value),
            CacheLookup::Miss => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_accessors() {
        let hit = CacheLookup::Hit {
            value: Bytes::from("test"),
            tier: CacheTier::L2Remote,
        };
        assert!(hit.is_hit());
        assert!(!hit.is_miss());
        assert_eq!(hit.tier(), Some(CacheTier::L2Remote));
        assert_eq!(hit.into_value(), Some(Bytes::from("test")));

        let miss = CacheLookup::Miss;
        assert!(miss.is_miss());
        assert_eq!(miss.tier(), None);
        assert_eq!(miss.into_value(), None);
    }
}
