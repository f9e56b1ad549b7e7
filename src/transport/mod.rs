//! Upstream Transport
//!
//! Everything that touches the network on behalf of a provider:
//!
//! - [`ConcurrencyGate`]: FIFO admission gate capping in-flight work
//! - [`Transport`]: pooled HTTP client with retry, backoff and counters
//! - [`RetryPolicy`]: retry predicate and jittered exponential backoff
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Transport                            │
//! │  execute(request)                                             │
//! │     │                                                         │
//! │     ▼                                                         │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐   │
//! │  │ JitteredBack │──▶│ Socket Gate  │──▶│ reqwest pool     │   │
//! │  │ off (retry)  │   │ (max_sockets)│   │ (keep-alive)     │   │
//! │  └──────────────┘   └──────────────┘   └──────────────────┘   │
//! │     │                                                         │
//! │     ▼                                                         │
//! │  PerformanceCounters (once per logical call)                  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod client;
pub mod gate;
pub mod metrics;
pub mod request;
pub mod retry;

pub use client::{Transport, TransportConfig};
pub use gate::{ConcurrencyGate, GatePermit};
pub use metrics::{PerformanceCounters, PerformanceSnapshot};
pub use request::{TransportRequest, TransportResponse};
pub use retry::{JitteredBackoff, RetryPolicy};
