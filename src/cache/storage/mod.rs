//! Remote Cache Tier
//!
//! The L2 seam. Any store that can hold opaque bytes under string keys with a
//! TTL (Redis, memcached, a shared in-process map) implements [`RemoteTier`].
//! Failures returned here never reach callers of the tiered cache; they are
//! logged and treated as misses.

mod memory;

pub use memory::{SharedMemoryTier, SharedMemoryTierStats};

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// RemoteTier Trait
// =============================================================================

/// Storage operations for a remote (L2) cache tier
#[async_trait]
pub trait RemoteTier: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Get a live value by key
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Store a value with an expiry
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()>;

    /// Delete a value; returns whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Delete every key matching a glob pattern; returns how many
    ///
    /// With `within`, a key must also match that second pattern. Namespaced
    /// caches pass their namespace here so a shared store stays partitioned.
    async fn delete_matching(&self, pattern: &str, within: Option<&str>) -> Result<u64>;

    /// Drop every entry
    async fn clear(&self) -> Result<()>;

    /// Batch get, index-aligned with `keys`
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    /// Batch set with a shared TTL
    async fn mset(&self, entries: &[(String, Bytes)], ttl: Duration) -> Result<()> {
        for (key, value) in entries {
            self.set(key, value.clone(), ttl).await?;
        }
        Ok(())
    }

    /// Check if the store is reachable
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Shared handle to a remote tier
pub type SharedRemoteTier = Arc<dyn RemoteTier>;
