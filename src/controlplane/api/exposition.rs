//! Prometheus Exposition
//!
//! Renders a [`GatewayMetrics`] snapshot in the Prometheus text format. Each
//! scrape builds a fresh registry from the snapshot, so the exported values
//! always come from the same counters the JSON endpoint reports.

use crate::controlplane::orchestrator::GatewayMetrics;
use crate::controlplane::HealthState;
use crate::error::{Error, Result};
use prometheus::{Encoder, GaugeVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

const NAMESPACE: &str = "provider_gateway";

fn opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help).namespace(NAMESPACE)
}

fn prometheus_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics exposition failed: {}", e))
}

/// Numeric encoding of a health state for the `health_state` gauge
fn health_value(state: HealthState) -> i64 {
    match state {
        HealthState::Unknown => -1,
        HealthState::Unhealthy => 0,
        HealthState::Degraded => 1,
        HealthState::Healthy => 2,
    }
}

/// Render metrics in the Prometheus text exposition format
pub fn render_prometheus(metrics: &GatewayMetrics) -> Result<String> {
    let registry = Registry::new();

    let requests = IntCounterVec::new(
        opts("requests_total", "Upstream calls per provider"),
        &["provider"],
    )
    .map_err(prometheus_error)?;
    let errors = IntCounterVec::new(
        opts("request_errors_total", "Failed upstream calls per provider"),
        &["provider"],
    )
    .map_err(prometheus_error)?;
    let response_time = GaugeVec::new(
        opts("response_time_avg_ms", "Average upstream response time"),
        &["provider"],
    )
    .map_err(prometheus_error)?;
    let sockets = IntGaugeVec::new(
        opts("sockets_in_use", "Sockets currently held by the transport"),
        &["provider"],
    )
    .map_err(prometheus_error)?;
    let cache_hits = IntCounterVec::new(
        opts("cache_hits_total", "Cache hits per tier"),
        &["provider", "tier"],
    )
    .map_err(prometheus_error)?;
    let cache_misses = IntCounterVec::new(
        opts("cache_misses_total", "Cache misses"),
        &["provider"],
    )
    .map_err(prometheus_error)?;
    let cache_evictions = IntCounterVec::new(
        opts("cache_evictions_total", "L1 capacity evictions"),
        &["provider"],
    )
    .map_err(prometheus_error)?;
    let cache_entries = IntGaugeVec::new(
        opts("cache_entries", "Entries held in L1"),
        &["provider"],
    )
    .map_err(prometheus_error)?;
    let health = IntGaugeVec::new(
        opts(
            "health_state",
            "Provider health (-1 unknown, 0 unhealthy, 1 degraded, 2 healthy)",
        ),
        &["provider"],
    )
    .map_err(prometheus_error)?;
    let uptime = IntGauge::with_opts(opts("uptime_seconds", "Seconds since the gateway started"))
        .map_err(prometheus_error)?;

    for (id, provider) in &metrics.providers {
        let labels = [id.as_str()];
        requests
            .with_label_values(&labels)
            .inc_by(provider.transport.request_count);
        errors
            .with_label_values(&labels)
            .inc_by(provider.transport.error_count);
        response_time
            .with_label_values(&labels)
            .set(provider.transport.average_response_time_ms);
        sockets
            .with_label_values(&labels)
            .set(provider.sockets_in_use as i64);
        cache_hits
            .with_label_values(&[id.as_str(), "l1"])
            .inc_by(provider.cache.l1_hits);
        cache_hits
            .with_label_values(&[id.as_str(), "l2"])
            .inc_by(provider.cache.l2_hits);
        cache_misses.with_label_values(&labels).inc_by(provider.cache.misses);
        cache_evictions
            .with_label_values(&labels)
            .inc_by(provider.cache.evictions);
        cache_entries
            .with_label_values(&labels)
            .set(provider.cache.entry_count as i64);
        health.with_label_values(&labels).set(health_value(provider.health));
    }
    uptime.set(metrics.uptime_secs as i64);

    registry.register(Box::new(requests)).map_err(prometheus_error)?;
    registry.register(Box::new(errors)).map_err(prometheus_error)?;
    registry.register(Box::new(response_time)).map_err(prometheus_error)?;
    registry.register(Box::new(sockets)).map_err(prometheus_error)?;
    registry.register(Box::new(cache_hits)).map_err(prometheus_error)?;
    registry.register(Box::new(cache_misses)).map_err(prometheus_error)?;
    registry.register(Box::new(cache_evictions)).map_err(prometheus_error)?;
    registry.register(Box::new(cache_entries)).map_err(prometheus_error)?;
    registry.register(Box::new(health)).map_err(prometheus_error)?;
    registry.register(Box::new(uptime)).map_err(prometheus_error)?;

    if let Some(process) = &metrics.process {
        let memory = IntGauge::with_opts(opts("process_memory_bytes", "Resident memory"))
            .map_err(prometheus_error)?;
        memory.set(process.memory_bytes as i64);
        registry.register(Box::new(memory)).map_err(prometheus_error)?;
    }

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&registry.gather(), &mut buffer)
        .map_err(prometheus_error)?;
    String::from_utf8(buffer).map_err(|e| Error::Internal(format!("metrics are not UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStats;
    use crate::controlplane::orchestrator::ProviderMetrics;
    use crate::controlplane::AggregateSnapshot;
    use crate::transport::PerformanceSnapshot;
    use chrono::Utc;
    use std::collections::BTreeMap;

    #[test]
    fn test_render() {
        let mut providers = BTreeMap::new();
        providers.insert(
            "alpha".to_string(),
            ProviderMetrics {
                kind: "http-json".into(),
                transport: PerformanceSnapshot {
                    request_count: 10,
                    error_count: 2,
                    ..Default::default()
                },
                sockets_in_use: 1,
                cache: CacheStats {
                    l1_hits: 4,
                    misses: 6,
                    ..Default::default()
                },
                health: HealthState::Healthy,
            },
        );
        let metrics = GatewayMetrics {
            aggregate: AggregateSnapshot::default(),
            providers,
            process: None,
            started_at: Utc::now(),
            uptime_secs: 42,
        };

        let text = render_prometheus(&metrics).unwrap();
        assert!(text.contains("provider_gateway_requests_total{provider=\"alpha\"} 10"));
        assert!(text.contains("provider_gateway_request_errors_total{provider=\"alpha\"} 2"));
        assert!(text.contains("provider_gateway_cache_hits_total{provider=\"alpha\",tier=\"l1\"} 4"));
        assert!(text.contains("provider_gateway_health_state{provider=\"alpha\"} 2"));
        assert!(text.contains("provider_gateway_uptime_seconds 42"));
    }
}
