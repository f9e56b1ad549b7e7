//! Pooled HTTP Transport
//!
//! Executes single logical requests against an upstream with a pooled
//! reqwest client, a socket ceiling enforced by a [`ConcurrencyGate`], and
//! transparent retry of transient failures.

use crate::error::{Error, ErrorKind, OpResult, OperationError, Result};
use crate::transport::gate::ConcurrencyGate;
use crate::transport::metrics::{PerformanceCounters, PerformanceSnapshot};
use crate::transport::request::{TransportRequest, TransportResponse};
use crate::transport::retry::RetryPolicy;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for a transport
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Maximum concurrent sockets for this transport
    pub max_sockets: usize,
    /// Fraction of `max_sockets` kept alive as idle sockets per host
    pub keep_alive_fraction: f64,
    /// How long an idle pooled socket is kept
    pub idle_timeout_ms: u64,
    /// TCP keep-alive probe interval
    pub tcp_keep_alive_ms: u64,
    /// Connect timeout
    pub connect_timeout_ms: u64,
    /// Whole-request timeout per attempt
    pub request_timeout_ms: u64,
    /// User agent sent with every request
    pub user_agent: String,
    /// Headers sent with every request
    pub default_headers: BTreeMap<String, String>,
    /// Retry policy
    pub retry: RetryPolicy,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_sockets: 50,
            keep_alive_fraction: 0.2,
            idle_timeout_ms: 30_000,
            tcp_keep_alive_ms: 60_000,
            connect_timeout_ms: 5_000,
            request_timeout_ms: 10_000,
            user_agent: format!("{}/{}", crate::NAME, crate::VERSION),
            default_headers: BTreeMap::new(),
            retry: RetryPolicy::default(),
        }
    }
}

impl TransportConfig {
    /// Validate value ranges
    pub fn validate(&self) -> Result<()> {
        if self.max_sockets == 0 {
            return Err(Error::Configuration("max_sockets must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.keep_alive_fraction) {
            return Err(Error::Configuration(format!(
                "keep_alive_fraction must be within [0, 1], got {}",
                self.keep_alive_fraction
            )));
        }
        if self.request_timeout_ms == 0 {
            return Err(Error::Configuration("request_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    /// Idle sockets kept per host
    pub fn idle_sockets_per_host(&self) -> usize {
        (self.max_sockets as f64 * self.keep_alive_fraction).ceil() as usize
    }

    fn header_map(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.default_headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                Error::Configuration(format!("Invalid header name {}: {}", name, e))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                Error::Configuration(format!("Invalid header value for {}: {}", name, e))
            })?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

// =============================================================================
// Transport
// =============================================================================

/// Pooled HTTP execution unit with retry and performance counters
pub struct Transport {
    /// Owner name (provider id), attached to errors and logs
    name: String,
    config: TransportConfig,
    /// Pooled client; `None` once torn down
    client: RwLock<Option<reqwest::Client>>,
    /// Socket ceiling
    sockets: ConcurrencyGate,
    counters: PerformanceCounters,
    closed: AtomicBool,
}

impl Transport {
    /// Create a new transport
    pub fn new(name: impl Into<String>, config: TransportConfig) -> Result<Self> {
        config.validate()?;
        let name = name.into();

        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.idle_sockets_per_host())
            .pool_idle_timeout(Duration::from_millis(config.idle_timeout_ms))
            .tcp_keepalive(Duration::from_millis(config.tcp_keep_alive_ms))
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .user_agent(config.user_agent.clone())
            .default_headers(config.header_map()?)
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        let sockets = ConcurrencyGate::new(config.max_sockets)?;

        debug!(
            transport = %name,
            max_sockets = config.max_sockets,
            idle_per_host = config.idle_sockets_per_host(),
            "Transport created"
        );

        Ok(Self {
            name,
            config,
            client: RwLock::new(Some(client)),
            sockets,
            counters: PerformanceCounters::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    fn client(&self) -> OpResult<reqwest::Client> {
        self.client.read().clone().ok_or_else(|| {
            OperationError::closed(format!("Transport {} is closed", self.name))
                .with_provider(self.name.as_str())
        })
    }

    /// Execute one logical request, retrying transient failures
    ///
    /// Counters are updated once for the whole call, so the recorded latency
    /// includes every retry and backoff delay.
    pub async fn execute(&self, request: TransportRequest) -> OpResult<TransportResponse> {
        let client = self.client()?;
        let started = Instant::now();
        let attempts = AtomicU32::new(0);

        let client_ref = &client;
        let request_ref = &request;
        let attempts_ref = &attempts;

        let outcome = backoff::future::retry_notify(
            self.config.retry.backoff(),
            move || {
                attempts_ref.fetch_add(1, Ordering::Relaxed);
                let attempt = self.attempt(client_ref, request_ref);
                async move {
                    attempt.await.map_err(|err| {
                        if err.kind.is_retryable() {
                            backoff::Error::transient(err)
                        } else {
                            backoff::Error::permanent(err)
                        }
                    })
                }
            },
            |err: OperationError, delay: Duration| {
                warn!(
                    transport = %self.name,
                    url = %request.url,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying upstream request"
                );
            },
        )
        .await;

        let attempts = attempts.load(Ordering::Relaxed);
        let elapsed = started.elapsed();

        match outcome {
            Ok(response) => {
                self.counters.record(elapsed, false);
                debug!(
                    transport = %self.name,
                    url = %request.url,
                    status = response.status,
                    attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Upstream request succeeded"
                );
                Ok(response)
            }
            Err(err) => {
                self.counters.record(elapsed, true);
                let err = if err.kind.is_retryable() && attempts > self.config.retry.max_retries {
                    err.into_exhausted(attempts)
                } else {
                    err
                };
                debug!(
                    transport = %self.name,
                    url = %request.url,
                    kind = %err.kind,
                    attempts,
                    "Upstream request failed"
                );
                Err(err.with_provider(self.name.as_str()))
            }
        }
    }

    /// One attempt: take a socket slot, send, read the body, classify
    async fn attempt(
        &self,
        client: &reqwest::Client,
        request: &TransportRequest,
    ) -> OpResult<TransportResponse> {
        let _socket = self.sockets.acquire().await?;

        let response = request
            .to_builder(client)
            .send()
            .await
            .map_err(|e| OperationError::from_reqwest(&e))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| OperationError::from_reqwest(&e).with_status(status))?;

        if ErrorKind::from_status(status).is_some() {
            return Err(OperationError::from_status(
                status,
                String::from_utf8_lossy(&body),
            ));
        }

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }

    /// Execute independent requests with at most `max_concurrency` in flight
    ///
    /// Results are index-aligned with `requests`; one failure never cancels
    /// or blocks the others.
    pub async fn execute_batch(
        &self,
        requests: Vec<TransportRequest>,
        max_concurrency: usize,
    ) -> Vec<OpResult<TransportResponse>> {
        let gate = ConcurrencyGate::clamped(max_concurrency);
        let gate = &gate;

        let calls = requests.into_iter().map(|request| async move {
            let _permit = gate.acquire().await?;
            self.execute(request).await
        });

        futures::future::join_all(calls).await
    }

    /// Performance counters snapshot
    pub fn stats(&self) -> PerformanceSnapshot {
        self.counters.snapshot()
    }

    /// Sockets currently in use
    pub fn sockets_in_use(&self) -> usize {
        self.sockets.in_flight()
    }

    /// Release pooled connections; later calls fail fast
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.client.write().take();
        self.sockets.close();
        info!(transport = %self.name, "Transport closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}
