//! Provider Orchestrator - The "Brain"
//!
//! Coordinates every upstream-facing operation:
//! - Provider construction from configuration
//! - Cache-first dispatch with write-back
//! - Fan-out across providers and bounded batches
//! - Health probing and metrics aggregation
//!
//! ```text
//!   dispatch(provider, op)
//!        │
//!        ▼
//!   ┌─────────┐ hit  ┌──────────────────────────────┐
//!   │ Tiered  │─────▶│ Dispatched { cached: true }  │
//!   │ Cache   │      └──────────────────────────────┘
//!   └────┬────┘
//!        │ miss
//!        ▼
//!   ┌──────────┐    ┌───────────┐    ┌──────────────────────────────┐
//!   │ Provider │───▶│ Transport │───▶│ write-back, cached: false    │
//!   └──────────┘    └───────────┘    └──────────────────────────────┘
//! ```

use crate::cache::{compile_key_pattern, CacheStats, SharedRemoteTier, TieredCache};
use crate::controlplane::health::{HealthConfig, HealthMonitor, HealthState, HealthStatus};
use crate::controlplane::providers::{ProviderConfig, ProviderFactory};
use crate::controlplane::telemetry::{
    AggregateMetrics, AggregateSnapshot, ProcessSample, ProcessSampler,
};
use crate::domain::ports::{Operation, OperationOutput, ProviderRef};
use crate::error::{Error, OpResult, OperationError, Result};
use crate::transport::{ConcurrencyGate, PerformanceSnapshot, Transport};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// =============================================================================
// Orchestrator Configuration
// =============================================================================

/// Configuration for the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Providers by id
    pub providers: BTreeMap<String, ProviderConfig>,
    /// Health probing
    pub health: HealthConfig,
    /// Process sampling period (0 disables it)
    pub metrics_interval_ms: u64,
    /// Batch concurrency when the caller gives none
    pub default_batch_concurrency: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            providers: BTreeMap::new(),
            health: HealthConfig::default(),
            metrics_interval_ms: 60_000,
            default_batch_concurrency: 5,
        }
    }
}

impl OrchestratorConfig {
    /// Validate orchestrator-wide settings
    ///
    /// Per-provider settings are validated at construction, where a bad
    /// provider is skipped rather than failing the gateway.
    pub fn validate(&self) -> Result<()> {
        self.health.validate()?;
        if self.default_batch_concurrency == 0 {
            return Err(Error::Configuration(
                "default_batch_concurrency must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn with_provider(mut self, id: impl Into<String>, config: ProviderConfig) -> Self {
        self.providers.insert(id.into(), config);
        self
    }
}

// =============================================================================
// Results
// =============================================================================

/// Outcome of one dispatched operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dispatched {
    pub provider_id: String,
    pub operation: String,
    /// Served from cache rather than upstream
    pub cached: bool,
    pub duration_ms: u64,
    pub result: OperationOutput,
}

/// Outcome of a batch against one provider
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub provider_id: String,
    /// Index-aligned with the submitted operations
    pub results: Vec<OpResult<Dispatched>>,
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
    pub duration_ms: u64,
}

impl BatchResult {
    fn from_results(provider_id: &str, results: Vec<OpResult<Dispatched>>, elapsed: Duration) -> Self {
        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        let total = results.len();
        Self {
            provider_id: provider_id.to_string(),
            results,
            succeeded,
            failed: total - succeeded,
            total,
            duration_ms: elapsed.as_millis() as u64,
        }
    }
}

/// Per-provider metrics breakdown
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderMetrics {
    pub kind: String,
    pub transport: PerformanceSnapshot,
    pub sockets_in_use: usize,
    pub cache: CacheStats,
    pub health: HealthState,
}

/// Gateway-wide metrics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayMetrics {
    pub aggregate: AggregateSnapshot,
    pub providers: BTreeMap<String, ProviderMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessSample>,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

// =============================================================================
// Provider Slot
// =============================================================================

/// Everything the orchestrator owns for one provider
struct ProviderSlot {
    id: String,
    provider: ProviderRef,
    transport: Transport,
    cache: TieredCache,
}

impl ProviderSlot {
    fn build(
        id: &str,
        config: &ProviderConfig,
        factory: &ProviderFactory,
        remote: Option<SharedRemoteTier>,
    ) -> Result<Self> {
        config.validate()?;
        let provider = factory.create(id, config)?;
        let transport = Transport::new(id, config.transport.clone())?;
        let cache = TieredCache::with_namespace(id, config.cache.clone(), remote)?;
        Ok(Self {
            id: id.to_string(),
            provider,
            transport,
            cache,
        })
    }
}

// =============================================================================
// Orchestrator Builder
// =============================================================================

/// Builder for an [`Orchestrator`]
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    factory: ProviderFactory,
    remote: Option<SharedRemoteTier>,
}

impl OrchestratorBuilder {
    /// Use a factory with extra provider kinds registered
    pub fn factory(mut self, factory: ProviderFactory) -> Self {
        self.factory = factory;
        self
    }

    /// Share a remote (L2) cache tier across every provider cache
    pub fn remote_tier(mut self, remote: SharedRemoteTier) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Construct providers eagerly and start background tasks
    ///
    /// A provider whose construction fails is logged and left out.
    pub fn build(self) -> Result<Arc<Orchestrator>> {
        self.config.validate()?;

        let health = HealthMonitor::new(self.config.health.clone());
        let mut providers = BTreeMap::new();

        for (id, provider_config) in &self.config.providers {
            match ProviderSlot::build(id, provider_config, &self.factory, self.remote.clone()) {
                Ok(slot) => {
                    info!(provider = %id, kind = %provider_config.kind, "Provider registered");
                    health.register(id);
                    providers.insert(id.clone(), Arc::new(slot));
                }
                Err(e) => {
                    error!(provider = %id, error = %e, "Failed to construct provider, skipping");
                }
            }
        }

        let orchestrator = Arc::new(Orchestrator {
            config: self.config,
            providers: RwLock::new(providers),
            remote: self.remote,
            health,
            aggregate: AggregateMetrics::new(),
            sampler: ProcessSampler::new(),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
            started_at: Utc::now(),
        });

        orchestrator.start_background_tasks();

        info!(
            providers = orchestrator.provider_ids().len(),
            "Orchestrator initialized"
        );
        Ok(orchestrator)
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Main orchestrator that coordinates all provider operations
pub struct Orchestrator {
    config: OrchestratorConfig,
    /// Provider slots by id
    providers: RwLock<BTreeMap<String, Arc<ProviderSlot>>>,
    /// Remote tier shared by every provider cache, if any
    remote: Option<SharedRemoteTier>,
    health: HealthMonitor,
    aggregate: AggregateMetrics,
    sampler: ProcessSampler,
    /// Parent token of every background task
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    destroyed: AtomicBool,
    started_at: DateTime<Utc>,
}

impl Orchestrator {
    pub fn builder(config: OrchestratorConfig) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            factory: ProviderFactory::new(),
            remote: None,
        }
    }

    /// Create an orchestrator with the built-in provider kinds
    pub fn new(config: OrchestratorConfig) -> Result<Arc<Self>> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Ids of every constructed provider
    pub fn provider_ids(&self) -> Vec<String> {
        self.providers.read().keys().cloned().collect()
    }

    pub fn has_provider(&self, provider_id: &str) -> bool {
        self.providers.read().contains_key(provider_id)
    }

    fn slot(&self, provider_id: &str) -> OpResult<Arc<ProviderSlot>> {
        self.providers
            .read()
            .get(provider_id)
            .cloned()
            .ok_or_else(|| OperationError::unknown_provider(provider_id))
    }

    fn slots(&self) -> Vec<Arc<ProviderSlot>> {
        self.providers.read().values().cloned().collect()
    }

    fn ensure_open(&self) -> OpResult<()> {
        if self.is_destroyed() {
            return Err(OperationError::closed("Orchestrator has been destroyed"));
        }
        Ok(())
    }

    // =========================================================================
    // Background Tasks
    // =========================================================================

    fn start_background_tasks(self: &Arc<Self>) {
        if tokio::runtime::Handle::try_current().is_err() {
            warn!("No async runtime, background health and metrics tasks not started");
            return;
        }

        if self.config.health.enabled && !self.providers.read().is_empty() {
            self.spawn_periodic("health-probe", self.config.health.interval(), |this| async move {
                this.check_health().await;
            });
        }

        if self.config.metrics_interval_ms > 0 {
            let interval = Duration::from_millis(self.config.metrics_interval_ms);
            self.spawn_periodic("process-sampler", interval, |this| async move {
                if let Some(sample) = this.sampler.sample() {
                    debug!(
                        memory_bytes = sample.memory_bytes,
                        cpu_percent = sample.cpu_percent,
                        "Process sampled"
                    );
                }
            });
        }
    }

    /// Run `tick` every `interval` until destroyed
    ///
    /// The task holds a weak reference, so it never keeps the orchestrator
    /// alive on its own.
    fn spawn_periodic<F, Fut>(self: &Arc<Self>, name: &'static str, interval: Duration, tick: F)
    where
        F: Fn(Arc<Self>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let weak = Arc::downgrade(self);
        let token = self.shutdown.child_token();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(this) = weak.upgrade() else { break };
                        tick(this).await;
                    }
                }
            }
            debug!(task = name, "Background task stopped");
        });

        self.tasks.lock().push(handle);
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Run one operation against one provider, cache first
    pub async fn dispatch(&self, provider_id: &str, operation: &Operation) -> OpResult<Dispatched> {
        self.ensure_open()?;
        let slot = self.slot(provider_id)?;
        let start = Instant::now();

        let key = operation.cache_key(provider_id);

        if let Some(bytes) = slot.cache.get(&key).await {
            match serde_json::from_slice::<OperationOutput>(&bytes) {
                Ok(result) => {
                    debug!(provider = %provider_id, key = %key, "Served from cache");
                    return Ok(Dispatched {
                        provider_id: provider_id.to_string(),
                        operation: operation.name().to_string(),
                        cached: true,
                        duration_ms: start.elapsed().as_millis() as u64,
                        result,
                    });
                }
                Err(e) => {
                    warn!(provider = %provider_id, key = %key, error = %e, "Discarding undecodable cache entry");
                    slot.cache.delete(&key).await;
                }
            }
        }

        let outcome = slot
            .provider
            .execute(&slot.transport, operation)
            .await
            .map_err(|e| {
                if e.provider_id.is_some() {
                    e
                } else {
                    e.with_provider(provider_id)
                }
            });
        self.aggregate.record(start.elapsed(), outcome.is_err());
        let result = outcome?;

        // an empty auxiliary result may stand for a swallowed failure
        let cacheable = !matches!(&result, OperationOutput::Auxiliary(aux) if aux.is_empty());
        if cacheable {
            match serde_json::to_vec(&result) {
                Ok(encoded) => slot.cache.set(&key, Bytes::from(encoded), None).await,
                Err(e) => warn!(provider = %provider_id, key = %key, error = %e, "Failed to encode result for cache"),
            }
        }

        Ok(Dispatched {
            provider_id: provider_id.to_string(),
            operation: operation.name().to_string(),
            cached: false,
            duration_ms: start.elapsed().as_millis() as u64,
            result,
        })
    }

    /// Run the same operation on every provider (or a subset) concurrently
    ///
    /// Each provider's outcome is isolated; unknown ids in the subset get a
    /// configuration error entry.
    pub async fn dispatch_all(
        &self,
        operation: &Operation,
        providers: Option<&[String]>,
    ) -> BTreeMap<String, OpResult<Dispatched>> {
        let ids = match providers {
            Some(ids) => ids.to_vec(),
            None => self.provider_ids(),
        };

        let calls = ids.into_iter().map(|id| async move {
            let outcome = self.dispatch(&id, operation).await;
            (id, outcome)
        });

        let results: BTreeMap<_, _> = futures::future::join_all(calls).await.into_iter().collect();

        let failed = results.values().filter(|r| r.is_err()).count();
        debug!(
            operation = %operation.name(),
            providers = results.len(),
            failed,
            "Fan-out completed"
        );
        results
    }

    /// Run operations against one provider with bounded concurrency
    ///
    /// Results are index-aligned with `operations`. Only an unknown provider
    /// or a zero concurrency fails the whole call.
    pub async fn batch(
        &self,
        provider_id: &str,
        operations: Vec<Operation>,
        max_concurrency: Option<usize>,
    ) -> OpResult<BatchResult> {
        self.ensure_open()?;
        self.slot(provider_id)?;

        let concurrency = max_concurrency.unwrap_or(self.config.default_batch_concurrency);
        let gate = ConcurrencyGate::new(concurrency)
            .map_err(|e| OperationError::configuration(e.to_string()).with_provider(provider_id))?;
        let gate = &gate;

        let start = Instant::now();
        let calls = operations.iter().map(|operation| async move {
            let _permit = gate.acquire().await?;
            self.dispatch(provider_id, operation).await
        });
        let results = futures::future::join_all(calls).await;

        let batch = BatchResult::from_results(provider_id, results, start.elapsed());
        info!(
            provider = %provider_id,
            total = batch.total,
            succeeded = batch.succeeded,
            failed = batch.failed,
            duration_ms = batch.duration_ms,
            "Batch completed"
        );
        Ok(batch)
    }

    // =========================================================================
    // Cache Management
    // =========================================================================

    /// Prefetch operations into a provider's cache
    pub async fn warmup_cache(
        &self,
        provider_id: &str,
        operations: Vec<Operation>,
    ) -> OpResult<BatchResult> {
        let batch = self.batch(provider_id, operations, None).await?;
        info!(
            provider = %provider_id,
            warmed = batch.succeeded,
            failed = batch.failed,
            "Cache warmup completed"
        );
        Ok(batch)
    }

    /// Seed a provider's cache with known results, without upstream calls
    pub async fn preload_cache(
        &self,
        provider_id: &str,
        entries: Vec<(Operation, OperationOutput)>,
    ) -> OpResult<usize> {
        self.ensure_open()?;
        let slot = self.slot(provider_id)?;

        let mut encoded = Vec::with_capacity(entries.len());
        for (operation, output) in entries {
            let key = operation.cache_key(provider_id);
            let bytes = serde_json::to_vec(&output).map_err(|e| {
                OperationError::protocol(format!("Failed to encode preload entry: {}", e))
                    .with_provider(provider_id)
            })?;
            encoded.push((key, Bytes::from(bytes)));
        }

        Ok(slot.cache.warmup(encoded, None).await)
    }

    /// Clear one provider's cache (or all), optionally by key pattern
    ///
    /// Patterns are globs over full keys, e.g. `alpha:search:*`. A single
    /// provider's clear never reaches past its namespace in a shared L2.
    /// Clearing every provider touches each L1 and the shared L2 once.
    /// Returns the number of entries removed.
    pub async fn clear_cache(
        &self,
        provider_id: Option<&str>,
        pattern: Option<&str>,
    ) -> OpResult<usize> {
        let compiled = pattern
            .map(compile_key_pattern)
            .transpose()
            .map_err(|e| OperationError::configuration(e.to_string()))?;

        let removed = match provider_id {
            Some(id) => {
                let slot = self.slot(id)?;
                match pattern {
                    Some(pattern) => slot
                        .cache
                        .clear_matching(pattern)
                        .await
                        .map_err(|e| OperationError::configuration(e.to_string()))?,
                    None => {
                        let held = slot.cache.stats().entry_count as usize;
                        slot.cache.clear().await;
                        held
                    }
                }
            }
            None => self.clear_all_caches(pattern, compiled.as_ref()).await,
        };

        info!(provider = ?provider_id, pattern = ?pattern, removed, "Cache cleared");
        Ok(removed)
    }

    async fn clear_all_caches(
        &self,
        pattern: Option<&str>,
        compiled: Option<&glob::Pattern>,
    ) -> usize {
        let slots = self.slots();

        let mut local_removed = 0;
        for slot in &slots {
            local_removed += match compiled {
                Some(compiled) => slot.cache.clear_local_matching(compiled),
                None => slot.cache.clear_local(),
            };
        }

        let mut remote_removed = 0;
        let uses_remote = slots.iter().any(|slot| slot.cache.has_l2());
        if let (Some(remote), true) = (&self.remote, uses_remote) {
            let result = match pattern {
                Some(pattern) => remote.delete_matching(pattern, None).await,
                None => remote.clear().await.map(|_| 0),
            };
            match result {
                Ok(n) => remote_removed = n as usize,
                Err(e) => {
                    warn!(tier = %remote.name(), pattern = ?pattern, error = %e, "Shared cache tier clear failed");
                }
            }
        }

        if slots.iter().any(|slot| slot.cache.has_l1()) {
            local_removed
        } else {
            remote_removed
        }
    }

    // =========================================================================
    // Health & Metrics
    // =========================================================================

    /// Latest health status of every provider
    pub fn get_health(&self) -> BTreeMap<String, HealthStatus> {
        self.health.snapshot()
    }

    /// Probe every provider now, bypassing the cache
    pub async fn check_health(&self) -> BTreeMap<String, HealthStatus> {
        if self.is_destroyed() {
            return self.get_health();
        }

        let slots = self.slots();
        let probes = slots.iter().map(|slot| async move {
            let status = self.health.probe(slot.provider.as_ref(), &slot.transport).await;
            (slot.id.clone(), status)
        });
        futures::future::join_all(probes).await.into_iter().collect()
    }

    /// Aggregate and per-provider metrics
    pub fn get_metrics(&self) -> GatewayMetrics {
        let providers = self
            .slots()
            .into_iter()
            .map(|slot| {
                let health = self
                    .health
                    .status(&slot.id)
                    .map(|s| s.state)
                    .unwrap_or_default();
                let metrics = ProviderMetrics {
                    kind: slot.provider.kind().to_string(),
                    transport: slot.transport.stats(),
                    sockets_in_use: slot.transport.sockets_in_use(),
                    cache: slot.cache.stats(),
                    health,
                };
                (slot.id.clone(), metrics)
            })
            .collect();

        let uptime = Utc::now().signed_duration_since(self.started_at);

        GatewayMetrics {
            aggregate: self.aggregate.snapshot(),
            providers,
            process: self.sampler.last(),
            started_at: self.started_at,
            uptime_secs: uptime.num_seconds().max(0) as u64,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Stop background tasks, close transports and cache sweepers
    ///
    /// Safe to call repeatedly; later operations fail with `Closed`.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.shutdown.cancel();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }

        for slot in self.slots() {
            slot.transport.close();
            slot.cache.shutdown();
        }

        info!("Orchestrator destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("providers", &self.provider_ids())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
