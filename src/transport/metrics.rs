//! Transport Performance Counters
//!
//! Raw counters live behind a single lock so the derived error rate and
//! average response time always agree with the counters they come from.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    request_count: u64,
    error_count: u64,
    total_response_time_ms: u64,
    last_response_time_ms: u64,
}

/// Per-transport performance counters, updated once per logical call
#[derive(Debug, Default)]
pub struct PerformanceCounters {
    inner: Mutex<Counters>,
}

impl PerformanceCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed logical call
    pub fn record(&self, elapsed: Duration, failed: bool) {
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let mut counters = self.inner.lock();
        counters.request_count += 1;
        if failed {
            counters.error_count += 1;
        }
        counters.total_response_time_ms =
            counters.total_response_time_ms.saturating_add(elapsed_ms);
        counters.last_response_time_ms = elapsed_ms;
    }

    /// Consistent point-in-time view
    pub fn snapshot(&self) -> PerformanceSnapshot {
        PerformanceSnapshot::from_counters(*self.inner.lock())
    }
}

/// Point-in-time view of transport performance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSnapshot {
    pub request_count: u64,
    pub error_count: u64,
    pub total_response_time_ms: u64,
    pub last_response_time_ms: u64,
    /// `error_count / request_count`, 0 when idle
    pub error_rate: f64,
    /// `total_response_time_ms / request_count`, 0 when idle
    pub average_response_time_ms: f64,
}

impl PerformanceSnapshot {
    fn from_counters(counters: Counters) -> Self {
        let (error_rate, average_response_time_ms) = if counters.request_count == 0 {
            (0.0, 0.0)
        } else {
            let requests = counters.request_count as f64;
            (
                counters.error_count as f64 / requests,
                counters.total_response_time_ms as f64 / requests,
            )
        };

        Self {
            request_count: counters.request_count,
            error_count: counters.error_count,
            total_response_time_ms: counters.total_response_time_ms,
            last_response_time_ms: counters.last_response_time_ms,
            error_rate,
            average_response_time_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_counters() {
        let counters = PerformanceCounters::new();
        let snap = counters.snapshot();
        assert_eq!(snap.request_count, 0);
        assert_eq!(snap.error_rate, 0.0);
        assert_eq!(snap.average_response_time_ms, 0.0);
    }

    #[test]
    fn test_derived_values() {
        let counters = PerformanceCounters::new();
        counters.record(Duration::from_millis(100), false);
        counters.record(Duration::from_millis(300), true);
        counters.record(Duration::from_millis(200), false);
        counters.record(Duration::from_millis(400), true);

        let snap = counters.snapshot();
        assert_eq!(snap.request_count, 4);
        assert_eq!(snap.error_count, 2);
        assert_eq!(snap.total_response_time_ms, 1000);
        assert_eq!(snap.last_response_time_ms, 400);
        assert!((snap.error_rate - 0.5).abs() < f64::EPSILON);
        assert!((snap.average_response_time_ms - 250.0).abs() < f64::EPSILON);
    }
}
