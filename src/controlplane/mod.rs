//! Gateway Control Plane
//!
//! The "brain" of the gateway: builds providers from configuration, routes
//! operations through per-provider caches and transports, probes health and
//! serves the REST surface.

pub mod api;
pub mod health;
pub mod orchestrator;
pub mod providers;
pub mod telemetry;

pub use api::*;
pub use health::{HealthConfig, HealthMonitor, HealthState, HealthStatus};
pub use orchestrator::*;
pub use providers::{HttpJsonEndpoints, HttpJsonProvider, ProviderConfig, ProviderFactory};
pub use telemetry::{AggregateMetrics, AggregateSnapshot, ProcessSample, ProcessSampler};
