//! Shared In-Memory Remote Tier
//!
//! A `RemoteTier` backed by DashMap. One instance can be shared by the caches
//! of every provider in a process, standing in for an external store.

use crate::cache::entry::compile_key_pattern;
use crate::cache::storage::RemoteTier;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct StoredValue {
    value: Bytes,
    expires_at: Instant,
}

// =============================================================================
// Shared Memory Tier
// =============================================================================

/// Operation counters for a shared memory tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedMemoryTierStats {
    pub gets: u64,
    pub sets: u64,
    pub deletes: u64,
    pub entry_count: u64,
}

/// Remote tier stored in a concurrent map
#[derive(Debug, Default)]
pub struct SharedMemoryTier {
    entries: DashMap<String, StoredValue>,
    gets: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
}

impl SharedMemoryTier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> SharedMemoryTierStats {
        SharedMemoryTierStats {
            gets: self.gets.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            entry_count: self.entries.len() as u64,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl RemoteTier for SharedMemoryTier {
    fn name(&self) -> &str {
        "shared-memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();

        let expired = match self.entries.get(key) {
            Some(stored) if stored.expires_at >= now => return Ok(Some(stored.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, v| v.expires_at < now);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        self.sets.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(
            key.to_string(),
            StoredValue {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(self.entries.remove(key).is_some())
    }

    async fn delete_matching(&self, pattern: &str, within: Option<&str>) -> Result<u64> {
        let pattern = compile_key_pattern(pattern)?;
        let scope = within.map(compile_key_pattern).transpose()?;

        let mut removed = 0u64;
        self.entries.retain(|key, _| {
            let doomed = pattern.matches(key) && scope.as_ref().map_or(true, |s| s.matches(key));
            removed += u64::from(doomed);
            !doomed
        });
        Ok(removed)
    }

    async fn clear(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }
}
