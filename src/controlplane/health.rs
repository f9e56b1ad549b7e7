//! Provider Health Probing
//!
//! Classifies each provider from a cheap probe call:
//! - `healthy`: probe succeeded within both thresholds
//! - `degraded`: probe succeeded but a threshold was violated
//! - `unhealthy`: probe failed
//!
//! The error-rate threshold is judged on transport calls made since the
//! previous probe, so a recovered provider reads healthy on its next probe.
//!
//! State only changes when a probe completes. Providers are never taken out
//! of rotation here; operators decide what to do with the status.

use crate::domain::ports::Provider;
use crate::error::{Error, OpResult, Result};
use crate::transport::{PerformanceSnapshot, Transport};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Health probing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Run the periodic probe task
    pub enabled: bool,
    /// Probe period
    pub interval_ms: u64,
    /// Response time above this is a threshold violation
    pub max_response_time_ms: u64,
    /// Transport error rate since the previous probe above this is a
    /// threshold violation
    pub max_error_rate: f64,
    /// Query used by the default probe
    pub probe_query: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 60_000,
            max_response_time_ms: 5_000,
            max_error_rate: 0.1,
            probe_query: "test".to_string(),
        }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.enabled && self.interval_ms == 0 {
            return Err(Error::Configuration(
                "health interval_ms must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.max_error_rate) {
            return Err(Error::Configuration(format!(
                "health max_error_rate must be within [0, 1], got {}",
                self.max_error_rate
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Health State
// =============================================================================

/// Provider health state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Not probed yet
    #[default]
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthState::Unknown => write!(f, "unknown"),
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::Degraded => write!(f, "degraded"),
            HealthState::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Last probe outcome for one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub provider_id: String,
    pub state: HealthState,
    pub last_response_time_ms: Option<u64>,
    pub error_rate: f64,
    pub checked_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Thresholds violated by the last probe
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<String>,
}

impl HealthStatus {
    pub fn unknown(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            state: HealthState::Unknown,
            last_response_time_ms: None,
            error_rate: 0.0,
            checked_at: None,
            last_error: None,
            violations: Vec::new(),
        }
    }
}

/// Classify a completed probe
pub fn classify(
    config: &HealthConfig,
    outcome: &OpResult<()>,
    elapsed: Duration,
    error_rate: f64,
) -> (HealthState, Vec<String>) {
    if let Err(e) = outcome {
        return (HealthState::Unhealthy, vec![format!("probe failed: {}", e.kind)]);
    }

    let mut violations = Vec::new();
    let elapsed_ms = elapsed.as_millis() as u64;
    if elapsed_ms >= config.max_response_time_ms {
        violations.push(format!(
            "response time {}ms >= {}ms",
            elapsed_ms, config.max_response_time_ms
        ));
    }
    if error_rate >= config.max_error_rate && error_rate > 0.0 {
        violations.push(format!(
            "error rate {:.3} >= {:.3}",
            error_rate, config.max_error_rate
        ));
    }

    if violations.is_empty() {
        (HealthState::Healthy, violations)
    } else {
        (HealthState::Degraded, violations)
    }
}

// =============================================================================
// Error Window
// =============================================================================

/// Raw transport counters as of one probe
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterMark {
    pub requests: u64,
    pub errors: u64,
}

impl CounterMark {
    pub fn of(snapshot: &PerformanceSnapshot) -> Self {
        Self {
            requests: snapshot.request_count,
            errors: snapshot.error_count,
        }
    }

    /// Error rate of the calls counted after this mark; 0 when none were
    ///
    /// Counters that moved backwards are read as a fresh start.
    pub fn error_rate_since(&self, now: &PerformanceSnapshot) -> f64 {
        let (requests, errors) =
            if now.request_count < self.requests || now.error_count < self.errors {
                (now.request_count, now.error_count)
            } else {
                (now.request_count - self.requests, now.error_count - self.errors)
            };

        if requests == 0 {
            0.0
        } else {
            errors as f64 / requests as f64
        }
    }
}

// =============================================================================
// Health Monitor
// =============================================================================

/// Holds the latest health status of every provider
#[derive(Debug)]
pub struct HealthMonitor {
    config: HealthConfig,
    statuses: RwLock<BTreeMap<String, HealthStatus>>,
    /// Transport counters at each provider's previous probe
    marks: Mutex<BTreeMap<String, CounterMark>>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            statuses: RwLock::new(BTreeMap::new()),
            marks: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Track a provider in the `unknown` state
    pub fn register(&self, provider_id: &str) {
        self.statuses
            .write()
            .entry(provider_id.to_string())
            .or_insert_with(|| HealthStatus::unknown(provider_id));
    }

    /// Probe one provider and record the outcome
    pub async fn probe(&self, provider: &dyn Provider, transport: &Transport) -> HealthStatus {
        let start = Instant::now();
        let outcome = provider.probe(transport, &self.config.probe_query).await;
        let elapsed = start.elapsed();
        let error_rate = self.window_error_rate(provider.id(), &transport.stats());

        let (state, violations) = classify(&self.config, &outcome, elapsed, error_rate);

        if !violations.is_empty() {
            warn!(
                provider = %provider.id(),
                state = %state,
                response_time_ms = elapsed.as_millis() as u64,
                error_rate,
                violations = ?violations,
                "Health threshold crossed"
            );
        }

        let status = HealthStatus {
            provider_id: provider.id().to_string(),
            state,
            last_response_time_ms: Some(elapsed.as_millis() as u64),
            error_rate,
            checked_at: Some(Utc::now()),
            last_error: outcome.err().map(|e| e.to_string()),
            violations,
        };

        self.record(status.clone());
        status
    }

    /// Error rate since the provider's previous probe; moves the mark forward
    fn window_error_rate(&self, provider_id: &str, now: &PerformanceSnapshot) -> f64 {
        let mut marks = self.marks.lock();
        let previous = marks.get(provider_id).copied().unwrap_or_default();
        marks.insert(provider_id.to_string(), CounterMark::of(now));
        previous.error_rate_since(now)
    }

    /// Store a status; returns the previous state
    pub fn record(&self, status: HealthStatus) -> HealthState {
        let previous = self
            .statuses
            .write()
            .insert(status.provider_id.clone(), status.clone())
            .map(|s| s.state)
            .unwrap_or_default();

        if previous != status.state {
            info!(
                provider = %status.provider_id,
                from = %previous,
                to = %status.state,
                "Provider health changed"
            );
        } else {
            debug!(provider = %status.provider_id, state = %status.state, "Provider health unchanged");
        }
        previous
    }

    pub fn status(&self, provider_id: &str) -> Option<HealthStatus> {
        self.statuses.read().get(provider_id).cloned()
    }

    /// Every tracked status, keyed by provider id
    pub fn snapshot(&self) -> BTreeMap<String, HealthStatus> {
        self.statuses.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::providers::{HttpJsonEndpoints, HttpJsonProvider};
    use crate::error::OperationError;
    use crate::transport::{RetryPolicy, TransportConfig};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config() -> HealthConfig {
        HealthConfig {
            max_response_time_ms: 100,
            max_error_rate: 0.2,
            ..Default::default()
        }
    }

    #[test]
    fn test_classify() {
        let ok: OpResult<()> = Ok(());
        let fast = Duration::from_millis(10);
        let slow = Duration::from_millis(150);

        assert_eq!(classify(&config(), &ok, fast, 0.0).0, HealthState::Healthy);
        assert_eq!(classify(&config(), &ok, slow, 0.0).0, HealthState::Degraded);

        let (state, violations) = classify(&config(), &ok, slow, 0.5);
        assert_eq!(state, HealthState::Degraded);
        assert_eq!(violations.len(), 2);

        let failed: OpResult<()> = Err(OperationError::transient("reset"));
        assert_eq!(classify(&config(), &failed, fast, 0.0).0, HealthState::Unhealthy);
    }

    #[test]
    fn test_record_transitions() {
        let monitor = HealthMonitor::new(config());
        monitor.register("alpha");
        assert_eq!(monitor.status("alpha").unwrap().state, HealthState::Unknown);

        let mut status = HealthStatus::unknown("alpha");
        status.state = HealthState::Healthy;
        assert_eq!(monitor.record(status.clone()), HealthState::Unknown);

        status.state = HealthState::Degraded;
        assert_eq!(monitor.record(status), HealthState::Healthy);

        // re-registering keeps the current state
        monitor.register("alpha");
        assert_eq!(monitor.status("alpha").unwrap().state, HealthState::Degraded);
        assert_eq!(monitor.snapshot().len(), 1);
    }

    fn counters(requests: u64, errors: u64) -> PerformanceSnapshot {
        PerformanceSnapshot {
            request_count: requests,
            error_count: errors,
            ..Default::default()
        }
    }

    #[test]
    fn test_error_rate_since_mark() {
        let start = CounterMark::default();
        assert_eq!(start.error_rate_since(&counters(0, 0)), 0.0);
        assert_eq!(start.error_rate_since(&counters(4, 1)), 0.25);

        // 20 failures, then 20 clean calls
        let mark = CounterMark::of(&counters(20, 20));
        assert_eq!(mark.error_rate_since(&counters(40, 20)), 0.0);
        assert_eq!(mark.error_rate_since(&counters(20, 20)), 0.0);
        assert_eq!(mark.error_rate_since(&counters(30, 25)), 0.5);

        assert_eq!(mark.error_rate_since(&counters(2, 1)), 0.5);
    }

    #[tokio::test]
    async fn test_recovered_provider_reads_healthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(20)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total": 0,
                "results": []
            })))
            .mount(&server)
            .await;

        let provider =
            HttpJsonProvider::new("alpha", &server.uri(), HttpJsonEndpoints::default()).unwrap();
        let transport = Transport::new(
            "alpha",
            TransportConfig {
                retry: RetryPolicy::no_retry(),
                ..Default::default()
            },
        )
        .unwrap();
        let monitor = HealthMonitor::new(HealthConfig {
            max_response_time_ms: 5_000,
            ..config()
        });

        for _ in 0..20 {
            let status = monitor.probe(&provider, &transport).await;
            assert_eq!(status.state, HealthState::Unhealthy);
        }

        let status = monitor.probe(&provider, &transport).await;
        assert_eq!(status.state, HealthState::Healthy);
        assert_eq!(status.error_rate, 0.0);
        assert!(status.violations.is_empty());

        // lifetime counters still carry the outage
        let lifetime = transport.stats();
        assert_eq!(lifetime.request_count, 21);
        assert_eq!(lifetime.error_count, 20);
        assert_eq!(monitor.status("alpha").unwrap().state, HealthState::Healthy);
    }

    #[test]
    fn test_config_validation() {
        assert!(HealthConfig::default().validate().is_ok());
        let bad = HealthConfig {
            max_error_rate: 1.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_value(HealthStatus::unknown("alpha")).unwrap();
        assert_eq!(json["state"], "unknown");
        assert_eq!(json["providerId"], "alpha");
    }
}
