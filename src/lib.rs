//! Provider Gateway
//!
//! A fan-out gateway in front of unreliable upstream HTTP providers. Every
//! provider gets its own pooled transport with bounded retries and its own
//! tiered cache; the orchestrator routes operations, batches and fan-out
//! searches through them and keeps health and metrics.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          REST API (axum)                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                       Provider Orchestrator                             │
//! │   dispatch · dispatch_all · batch · health probes · metrics             │
//! ├───────────────────────┬───────────────────────┬─────────────────────────┤
//! │   provider "alpha"    │   provider "beta"     │   provider ...          │
//! │  ┌─────────────────┐  │  ┌─────────────────┐  │                         │
//! │  │  Tiered Cache   │  │  │  Tiered Cache   │  │                         │
//! │  │  L1 LRU+TTL     │  │  │  L1 LRU+TTL     │  │                         │
//! │  │  L2 remote (opt)│  │  │  L2 remote (opt)│  │                         │
//! │  ├─────────────────┤  │  ├─────────────────┤  │                         │
//! │  │  Transport      │  │  │  Transport      │  │                         │
//! │  │  pool · retry   │  │  │  pool · retry   │  │                         │
//! │  └─────────────────┘  │  └─────────────────┘  │                         │
//! └───────────────────────┴───────────────────────┴─────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controlplane`]: Orchestrator, providers, health, telemetry and APIs
//! - [`transport`]: Pooled HTTP execution with retry and concurrency gating
//! - [`cache`]: Two-tier cache with LRU/TTL eviction
//! - [`domain`]: Provider contract and operation types
//! - [`config`]: Gateway configuration file
//! - [`error`]: Error types and handling

pub mod cache;
pub mod config;
pub mod controlplane;
pub mod domain;
pub mod error;
pub mod transport;

// Re-export commonly used types
pub use cache::{CacheConfig, CacheStats, RemoteTier, SharedMemoryTier, TieredCache};

pub use config::GatewayConfig;

pub use controlplane::{
    ApiServer, ApiServerConfig, BatchResult, Dispatched, GatewayMetrics, HealthConfig,
    HealthState, HealthStatus, HttpJsonProvider, Orchestrator, OrchestratorConfig,
    ProviderConfig, ProviderFactory,
};

pub use domain::ports::{
    AuxiliaryData, ItemDetail, Operation, OperationOutput, Provider, ProviderRef, SearchItem,
    SearchQuery, SearchResult,
};

pub use error::{Error, ErrorKind, OpResult, OperationError, Result};

pub use transport::{ConcurrencyGate, RetryPolicy, Transport, TransportConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
