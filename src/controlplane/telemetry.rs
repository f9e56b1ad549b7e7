//! Gateway Telemetry
//!
//! One running performance record across all providers, plus process
//! resource sampling.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use sysinfo::{Pid, System};

// =============================================================================
// Aggregate Performance
// =============================================================================

#[derive(Debug, Default)]
struct RunningRecord {
    request_count: u64,
    error_count: u64,
    /// Incremental mean (Welford)
    mean_response_time_ms: f64,
}

/// Cross-provider running performance record
#[derive(Debug, Default)]
pub struct AggregateMetrics {
    inner: Mutex<RunningRecord>,
}

impl AggregateMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one dispatched call
    pub fn record(&self, elapsed: Duration, failed: bool) {
        let sample = elapsed.as_secs_f64() * 1000.0;
        let mut record = self.inner.lock();
        record.request_count += 1;
        if failed {
            record.error_count += 1;
        }
        record.mean_response_time_ms +=
            (sample - record.mean_response_time_ms) / record.request_count as f64;
    }

    pub fn snapshot(&self) -> AggregateSnapshot {
        let record = self.inner.lock();
        let error_rate = if record.request_count == 0 {
            0.0
        } else {
            record.error_count as f64 / record.request_count as f64
        };
        AggregateSnapshot {
            request_count: record.request_count,
            error_count: record.error_count,
            error_rate,
            average_response_time_ms: record.mean_response_time_ms,
        }
    }
}

/// Point-in-time aggregate performance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateSnapshot {
    pub request_count: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub average_response_time_ms: f64,
}

// =============================================================================
// Process Sampling
// =============================================================================

/// Process resource usage at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSample {
    pub memory_bytes: u64,
    pub virtual_memory_bytes: u64,
    pub cpu_percent: f32,
    pub sampled_at: DateTime<Utc>,
}

/// Samples this process's memory and CPU
pub struct ProcessSampler {
    system: Mutex<System>,
    pid: Pid,
    last: Mutex<Option<ProcessSample>>,
}

impl ProcessSampler {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: Pid::from_u32(std::process::id()),
            last: Mutex::new(None),
        }
    }

    /// Refresh and store a sample; `None` if the process is not visible
    ///
    /// CPU usage is relative to the previous refresh, so the first sample
    /// reports 0.
    pub fn sample(&self) -> Option<ProcessSample> {
        let sample = {
            let mut system = self.system.lock();
            system.refresh_process(self.pid);
            let process = system.process(self.pid)?;
            ProcessSample {
                memory_bytes: process.memory(),
                virtual_memory_bytes: process.virtual_memory(),
                cpu_percent: process.cpu_usage(),
                sampled_at: Utc::now(),
            }
        };
        *self.last.lock() = Some(sample.clone());
        Some(sample)
    }

    /// Most recent sample
    pub fn last(&self) -> Option<ProcessSample> {
        self.last.lock().clone()
    }
}

impl Default for ProcessSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProcessSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSampler").field("pid", &self.pid).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incremental_mean_and_exact_error_rate() {
        let metrics = AggregateMetrics::new();
        assert_eq!(metrics.snapshot(), AggregateSnapshot::default());

        metrics.record(Duration::from_millis(10), false);
        metrics.record(Duration::from_millis(20), true);
        metrics.record(Duration::from_millis(30), false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.request_count, 3);
        assert_eq!(snapshot.error_count, 1);
        assert!((snapshot.error_rate - 1.0 / 3.0).abs() < 1e-12);
        assert!((snapshot.average_response_time_ms - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_process_sample() {
        let sampler = ProcessSampler::new();
        assert!(sampler.last().is_none());

        let sample = sampler.sample().expect("own process is visible");
        assert!(sample.memory_bytes > 0);
        assert_eq!(sampler.last(), Some(sample));
    }
}
