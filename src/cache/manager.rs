//! Tiered Cache Manager
//!
//! Coordinates the in-process L1 store and an optional remote L2 tier.
//! L1 is consulted first; an L2 hit is backfilled into L1 with L1's default
//! TTL. Remote-tier failures are logged and degrade to a miss.

use crate::cache::entry::{compile_key_pattern, CacheKey};
use crate::cache::lru::LruTtlStore;
use crate::cache::metrics::{CacheMetrics, CacheStats};
use crate::cache::storage::SharedRemoteTier;
use crate::cache::tier::{CacheConfig, CacheTier};
use crate::cache::CacheLookup;
use crate::error::{Error, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// =============================================================================
// Background Sweeper
// =============================================================================

#[derive(Debug)]
struct Sweeper {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Spawn the periodic expiry sweep for `store`
    ///
    /// The task holds only a weak reference and exits once the store is
    /// dropped or the token is cancelled. Returns `None` outside a runtime.
    fn spawn(store: &Arc<LruTtlStore>, interval: Duration, cache: String) -> Option<Self> {
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let weak = Arc::downgrade(store);

        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(store) = weak.upgrade() else { break };
                        let removed = store.sweep_expired();
                        if removed > 0 {
                            debug!(cache = %cache, removed, "Swept expired cache entries");
                        }
                    }
                }
            }
        });

        Some(Self { token, handle })
    }

    fn stop(self) {
        self.token.cancel();
        self.handle.abort();
    }
}

// =============================================================================
// Tiered Cache
// =============================================================================

/// Two-tier cache of opaque byte values
pub struct TieredCache {
    /// Name used in logs; also scopes `clear()` on a shared L2
    namespace: Option<String>,
    config: CacheConfig,
    l1: Option<Arc<LruTtlStore>>,
    l2: Option<SharedRemoteTier>,
    metrics: Arc<CacheMetrics>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl TieredCache {
    /// Create an unscoped cache
    pub fn new(config: CacheConfig, remote: Option<SharedRemoteTier>) -> Result<Self> {
        Self::build(None, config, remote)
    }

    /// Create a cache whose keys all start with `namespace:`
    ///
    /// `clear()` then only touches this namespace on a shared L2.
    pub fn with_namespace(
        namespace: impl Into<String>,
        config: CacheConfig,
        remote: Option<SharedRemoteTier>,
    ) -> Result<Self> {
        Self::build(Some(namespace.into()), config, remote)
    }

    fn build(
        namespace: Option<String>,
        config: CacheConfig,
        remote: Option<SharedRemoteTier>,
    ) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(CacheMetrics::new());
        let label = namespace.clone().unwrap_or_else(|| "default".to_string());

        let l1 = config.l1_enabled.then(|| {
            Arc::new(LruTtlStore::new(
                config.capacity,
                config.default_ttl(),
                metrics.clone(),
            ))
        });

        let l2 = if config.l2_enabled {
            if remote.is_none() {
                warn!(cache = %label, "L2 enabled but no remote tier configured, running L1 only");
            }
            remote
        } else {
            None
        };

        let sweeper = match (&l1, config.sweep_interval()) {
            (Some(store), Some(interval)) => Sweeper::spawn(store, interval, label.clone()),
            _ => None,
        };

        info!(
            cache = %label,
            l1 = l1.is_some(),
            l2 = l2.as_ref().map(|t| t.name()).unwrap_or("none"),
            capacity = config.capacity,
            default_ttl_ms = config.default_ttl_ms,
            "Tiered cache initialized"
        );

        Ok(Self {
            namespace,
            config,
            l1,
            l2,
            metrics,
            sweeper: Mutex::new(sweeper),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    fn label(&self) -> &str {
        self.namespace.as_deref().unwrap_or("default")
    }

    fn report_l2_error(&self, op: &'static str, key: &str, error: &Error) {
        self.metrics.record_l2_error();
        warn!(
            cache = %self.label(),
            tier = %CacheTier::L2Remote,
            op,
            key = %key,
            error = %error,
            "Cache tier operation failed"
        );
    }

    fn backfill(&self, key: &str, value: &Bytes) {
        if let Some(l1) = &self.l1 {
            l1.set(key, value.clone(), None);
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Look up a key, reporting which tier served it
    pub async fn lookup(&self, key: &str) -> CacheLookup {
        if let Some(value) = self.l1.as_ref().and_then(|l1| l1.get(key)) {
            self.metrics.record_l1_hit();
            return CacheLookup::Hit {
                value,
                tier: CacheTier::L1Memory,
            };
        }

        if let Some(l2) = &self.l2 {
            match l2.get(key).await {
                Ok(Some(value)) => {
                    self.metrics.record_l2_hit();
                    self.backfill(key, &value);
                    debug!(cache = %self.label(), key = %key, "L2 hit, backfilled L1");
                    return CacheLookup::Hit {
                        value,
                        tier: CacheTier::L2Remote,
                    };
                }
                Ok(None) => {}
                Err(e) => self.report_l2_error("get", key, &e),
            }
        }

        self.metrics.record_miss();
        CacheLookup::Miss
    }

    /// Get a value from the first tier holding it
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        self.lookup(key).await.into_value()
    }

    /// Batch get, index-aligned with `keys`
    ///
    /// L2 is queried once, for L1 misses only; every L2 hit is backfilled.
    pub async fn mget(&self, keys: &[String]) -> Vec<Option<Bytes>> {
        let mut values: Vec<Option<Bytes>> = keys
            .iter()
            .map(|key| self.l1.as_ref().and_then(|l1| l1.get(key)))
            .collect();

        let missing: Vec<usize> = values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.is_none().then_some(i))
            .collect();

        self.metrics.record_l1_hits((keys.len() - missing.len()) as u64);

        let mut l2_found = 0usize;
        if let (Some(l2), false) = (&self.l2, missing.is_empty()) {
            let missing_keys: Vec<String> = missing.iter().map(|&i| keys[i].clone()).collect();
            match l2.mget(&missing_keys).await {
                Ok(found) => {
                    for (&slot, value) in missing.iter().zip(found) {
                        if let Some(value) = value {
                            self.metrics.record_l2_hit();
                            self.backfill(&keys[slot], &value);
                            values[slot] = Some(value);
                            l2_found += 1;
                        }
                    }
                }
                Err(e) => self.report_l2_error("mget", &missing_keys.join(","), &e),
            }
        }

        self.metrics.record_misses((missing.len() - l2_found) as u64);

        values
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Write through every enabled tier; `None` uses the default TTL
    pub async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) {
        self.metrics.record_set();

        if let Some(l1) = &self.l1 {
            if let Some(evicted) = l1.set(key, value.clone(), ttl) {
                debug!(cache = %self.label(), evicted = %evicted, "Evicted least recently used entry");
            }
        }

        if let Some(l2) = &self.l2 {
            let ttl = ttl.unwrap_or_else(|| self.config.default_ttl());
            if let Err(e) = l2.set(key, value, ttl).await {
                self.report_l2_error("set", key, &e);
            }
        }
    }

    /// Batch write through every enabled tier
    pub async fn mset(&self, entries: Vec<(String, Bytes)>, ttl: Option<Duration>) {
        if entries.is_empty() {
            return;
        }

        if let Some(l1) = &self.l1 {
            for (key, value) in &entries {
                l1.set(key, value.clone(), ttl);
            }
        }
        self.metrics.record_sets(entries.len() as u64);

        if let Some(l2) = &self.l2 {
            let ttl = ttl.unwrap_or_else(|| self.config.default_ttl());
            if let Err(e) = l2.mset(&entries, ttl).await {
                let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
                self.report_l2_error("mset", &keys.join(","), &e);
            }
        }
    }

    /// Pre-populate the cache; returns the number of entries written
    pub async fn warmup(&self, entries: Vec<(String, Bytes)>, ttl: Option<Duration>) -> usize {
        let count = entries.len();
        self.mset(entries, ttl).await;
        info!(cache = %self.label(), count, "Cache warmed up");
        count
    }

    // =========================================================================
    // Invalidation
    // =========================================================================

    /// Delete a key from every tier; true if any tier held it
    pub async fn delete(&self, key: &str) -> bool {
        let mut existed = self.l1.as_ref().is_some_and(|l1| l1.delete(key));

        if let Some(l2) = &self.l2 {
            match l2.delete(key).await {
                Ok(found) => existed |= found,
                Err(e) => self.report_l2_error("delete", key, &e),
            }
        }
        existed
    }

    /// Drop every entry of this cache from every tier
    pub async fn clear(&self) {
        let removed = self.l1.as_ref().map(|l1| l1.clear()).unwrap_or(0);

        if let Some(l2) = &self.l2 {
            let result = match &self.namespace {
                Some(ns) => l2
                    .delete_matching(&CacheKey::namespace_pattern(ns), None)
                    .await
                    .map(|_| ()),
                None => l2.clear().await,
            };
            if let Err(e) = result {
                self.report_l2_error("clear", "*", &e);
            }
        }

        info!(cache = %self.label(), removed, "Cache cleared");
    }

    /// Drop every key matching a glob pattern from every tier
    ///
    /// On a namespaced cache the L2 delete is confined to the namespace.
    /// Returns the number of entries removed from L1, or from L2 when L1 is
    /// disabled. An invalid pattern is a configuration error.
    pub async fn clear_matching(&self, pattern: &str) -> Result<usize> {
        let compiled = compile_key_pattern(pattern)?;

        let l1_removed = self.l1.as_ref().map(|l1| l1.clear_matching(&compiled));

        let mut l2_removed = 0usize;
        if let Some(l2) = &self.l2 {
            let scope = self.namespace.as_deref().map(CacheKey::namespace_pattern);
            match l2.delete_matching(pattern, scope.as_deref()).await {
                Ok(n) => l2_removed = n as usize,
                Err(e) => self.report_l2_error("delete_matching", pattern, &e),
            }
        }

        let removed = l1_removed.unwrap_or(l2_removed);
        debug!(cache = %self.label(), pattern, removed, "Cleared matching cache entries");
        Ok(removed)
    }

    /// Drop every L1 entry, leaving L2 alone; returns entries removed
    ///
    /// For callers that clear a shared L2 once on behalf of many caches.
    pub fn clear_local(&self) -> usize {
        self.l1.as_ref().map(|l1| l1.clear()).unwrap_or(0)
    }

    /// Drop L1 entries matching `pattern`, leaving L2 alone
    pub fn clear_local_matching(&self, pattern: &glob::Pattern) -> usize {
        self.l1
            .as_ref()
            .map(|l1| l1.clear_matching(pattern))
            .unwrap_or(0)
    }

    pub fn has_l1(&self) -> bool {
        self.l1.is_some()
    }

    pub fn has_l2(&self) -> bool {
        self.l2.is_some()
    }

    // =========================================================================
    // Stats & Lifecycle
    // =========================================================================

    pub fn stats(&self) -> CacheStats {
        let (entries, bytes) = self
            .l1
            .as_ref()
            .map(|l1| (l1.len() as u64, l1.estimated_bytes()))
            .unwrap_or((0, 0));
        self.metrics.snapshot(entries, bytes)
    }

    pub fn reset_stats(&self) {
        self.metrics.reset();
    }

    /// Run an expiry sweep now; returns entries removed
    pub fn sweep_expired(&self) -> usize {
        self.l1.as_ref().map(|l1| l1.sweep_expired()).unwrap_or(0)
    }

    /// Check the remote tier, if any
    pub async fn health_check(&self) -> bool {
        match &self.l2 {
            Some(l2) => match l2.health_check().await {
                Ok(healthy) => healthy,
                Err(e) => {
                    self.report_l2_error("health_check", "-", &e);
                    false
                }
            },
            None => true,
        }
    }

    /// Stop the background sweep; safe to call repeatedly
    pub fn shutdown(&self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.stop();
            debug!(cache = %self.label(), "Cache sweeper stopped");
        }
    }

    pub fn has_sweeper(&self) -> bool {
        self.sweeper.lock().is_some()
    }
}

impl Drop for TieredCache {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            sweeper.stop();
        }
    }
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("namespace", &self.namespace)
            .field("config", &self.config)
            .field("l2", &self.l2.as_ref().map(|t| t.name().to_string()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::storage::{RemoteTier, SharedMemoryTier};
    use async_trait::async_trait;

    /// Remote tier that fails every call
    struct FailingTier;

    #[async_trait]
    impl RemoteTier for FailingTier {
        fn name(&self) -> &str {
            "failing"
        }

        async fn get(&self, _key: &str) -> Result<Option<Bytes>> {
            Err(Error::CacheTier {
                tier: "failing".into(),
                reason: "connection reset".into(),
            })
        }

        async fn set(&self, _key: &str, _value: Bytes, _ttl: Duration) -> Result<()> {
            Err(Error::CacheTier {
                tier: "failing".into(),
                reason: "connection reset".into(),
            })
        }

        async fn delete(&self, _key: &str) -> Result<bool> {
            Err(Error::CacheTier {
                tier: "failing".into(),
                reason: "connection reset".into(),
            })
        }

        async fn delete_matching(&self, _pattern: &str, _within: Option<&str>) -> Result<u64> {
            Err(Error::CacheTier {
                tier: "failing".into(),
                reason: "connection reset".into(),
            })
        }

        async fn clear(&self) -> Result<()> {
            Err(Error::CacheTier {
                tier: "failing".into(),
                reason: "connection reset".into(),
            })
        }
    }

    fn val(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    fn l1_config(capacity: usize) -> CacheConfig {
        CacheConfig::l1_only(capacity, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_get_set_and_stats() {
        let cache = TieredCache::new(l1_config(10), None).unwrap();

        assert!(cache.get("missing").await.is_none());
        cache.set("a", val("1"), None).await;
        assert_eq!(cache.get("a").await, Some(val("1")));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 0.5);
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.estimated_bytes, 2);

        cache.reset_stats();
        assert_eq!(cache.stats().total_requests(), 0);
    }

    #[tokio::test]
    async fn test_hot_key_survives_eviction() {
        let cache = TieredCache::new(l1_config(2), None).unwrap();
        cache.set("hot", val("h"), None).await;
        cache.set("cold", val("c"), None).await;
        assert!(cache.get("hot").await.is_some());

        cache.set("new", val("n"), None).await;
        assert!(cache.get("hot").await.is_some());
        assert!(cache.get("cold").await.is_none());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let cache = TieredCache::new(l1_config(10), None).unwrap();
        cache.set("k", val("v"), Some(Duration::from_millis(100))).await;

        tokio::time::advance(Duration::from_millis(50)).await;
        assert_eq!(cache.get("k").await, Some(val("v")));

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(cache.get("k").await.is_none());
        assert!(cache.get("k").await.is_none());
        assert_eq!(cache.stats().expirations, 1);

        // only a fresh set brings the key back
        cache.set("k", val("v2"), Some(Duration::from_millis(100))).await;
        assert_eq!(cache.get("k").await, Some(val("v2")));
        assert_eq!(cache.stats().entry_count, 1);
    }

    #[tokio::test]
    async fn test_l2_backfill() {
        let remote = Arc::new(SharedMemoryTier::new());
        let cache = TieredCache::new(l1_config(10).with_l2(), Some(remote.clone())).unwrap();

        // present only in L2
        remote
            .set("k", val("remote"), Duration::from_secs(60))
            .await
            .unwrap();

        let first = cache.lookup("k").await;
        assert!(matches!(first, CacheLookup::Hit { tier: CacheTier::L2Remote, .. }));
        assert_eq!(remote.stats().gets, 1);

        // served from L1 without consulting L2
        let second = cache.lookup("k").await;
        assert!(matches!(second, CacheLookup::Hit { tier: CacheTier::L1Memory, .. }));
        assert_eq!(second.into_value(), Some(val("remote")));
        assert_eq!(remote.stats().gets, 1);

        let stats = cache.stats();
        assert_eq!(stats.l2_hits, 1);
        assert_eq!(stats.l1_hits, 1);
    }

    #[tokio::test]
    async fn test_mget_queries_l2_for_misses_only() {
        let remote = Arc::new(SharedMemoryTier::new());
        let cache = TieredCache::new(l1_config(10).with_l2(), Some(remote.clone())).unwrap();

        cache.set("a", val("1"), None).await;
        remote
            .set("b", val("2"), Duration::from_secs(60))
            .await
            .unwrap();

        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let values = cache.mget(&keys).await;
        assert_eq!(values, vec![Some(val("1")), Some(val("2")), None]);

        // L2 mget falls back to per-key gets for the two L1 misses
        assert_eq!(remote.stats().gets, 2);

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 2);
    }

    #[tokio::test]
    async fn test_l2_failures_are_swallowed() {
        let cache = TieredCache::new(l1_config(10).with_l2(), Some(Arc::new(FailingTier))).unwrap();

        cache.set("k", val("v"), None).await;
        assert_eq!(cache.get("k").await, Some(val("v")));
        assert!(cache.get("other").await.is_none());
        assert!(cache.delete("k").await);
        cache.clear().await;

        // set, get(other), delete, clear
        let stats = cache.stats();
        assert_eq!(stats.l2_errors, 4);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_mset_warmup_and_clear_matching() {
        let remote = Arc::new(SharedMemoryTier::new());
        let cache = TieredCache::new(l1_config(10).with_l2(), Some(remote.clone())).unwrap();

        let written = cache
            .warmup(
                vec![
                    ("alpha:search:x".to_string(), val("1")),
                    ("alpha:item:1".to_string(), val("2")),
                    ("beta:search:x".to_string(), val("3")),
                ],
                None,
            )
            .await;
        assert_eq!(written, 3);
        assert_eq!(remote.len(), 3);

        assert_eq!(cache.clear_matching("alpha:*").await.unwrap(), 2);
        assert_eq!(remote.len(), 1);
        assert!(cache.get("beta:search:x").await.is_some());

        assert_matches::assert_matches!(
            cache.clear_matching("[").await,
            Err(Error::Configuration(_))
        );
    }

    #[tokio::test]
    async fn test_namespaced_clear_keeps_other_namespaces() {
        let remote: Arc<SharedMemoryTier> = Arc::new(SharedMemoryTier::new());
        let alpha =
            TieredCache::with_namespace("alpha", l1_config(10).with_l2(), Some(remote.clone()))
                .unwrap();
        let beta =
            TieredCache::with_namespace("beta", l1_config(10).with_l2(), Some(remote.clone()))
                .unwrap();

        alpha.set("alpha:search:x", val("1"), None).await;
        beta.set("beta:search:x", val("2"), None).await;

        alpha.clear().await;
        assert!(alpha.get("alpha:search:x").await.is_none());
        assert_eq!(remote.len(), 1);
        assert!(beta.get("beta:search:x").await.is_some());
    }

    #[tokio::test]
    async fn test_namespaced_pattern_clear_stays_in_namespace() {
        let remote: Arc<SharedMemoryTier> = Arc::new(SharedMemoryTier::new());
        let alpha =
            TieredCache::with_namespace("alpha", l1_config(10).with_l2(), Some(remote.clone()))
                .unwrap();
        let beta =
            TieredCache::with_namespace("beta", l1_config(10).with_l2(), Some(remote.clone()))
                .unwrap();

        alpha.set("alpha:search:x", val("1"), None).await;
        beta.set("beta:search:x", val("2"), None).await;

        assert_eq!(alpha.clear_matching("*").await.unwrap(), 1);
        assert_eq!(alpha.clear_matching("*:search:*").await.unwrap(), 0);
        assert_eq!(remote.len(), 1);
        assert_eq!(remote.get("beta:search:x").await.unwrap(), Some(val("2")));
    }

    #[tokio::test]
    async fn test_local_clear_leaves_l2() {
        let remote = Arc::new(SharedMemoryTier::new());
        let cache = TieredCache::new(l1_config(10).with_l2(), Some(remote.clone())).unwrap();
        cache.set("alpha:a", val("1"), None).await;
        cache.set("beta:a", val("2"), None).await;

        let pattern = compile_key_pattern("alpha:*").unwrap();
        assert_eq!(cache.clear_local_matching(&pattern), 1);
        assert_eq!(cache.clear_local(), 1);
        assert_eq!(cache.stats().entry_count, 0);
        assert_eq!(remote.len(), 2);
        assert!(cache.has_l1() && cache.has_l2());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweep() {
        let config = CacheConfig {
            sweep_interval_ms: 1_000,
            ..l1_config(10)
        };
        let cache = TieredCache::new(config, None).unwrap();
        assert!(cache.has_sweeper());

        cache.set("k", val("v"), Some(Duration::from_millis(100))).await;
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        assert_eq!(cache.stats().entry_count, 0);
        assert_eq!(cache.stats().expirations, 1);

        cache.shutdown();
        cache.shutdown();
        assert!(!cache.has_sweeper());
    }

    #[test]
    fn test_no_sweeper_outside_runtime() {
        let cache = TieredCache::new(l1_config(10), None).unwrap();
        assert!(!cache.has_sweeper());
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(TieredCache::new(l1_config(0), None).is_err());
    }
}
