//! API Module
//!
//! Provides the REST surface over the orchestrator and the Prometheus
//! exposition of its metrics.

pub mod exposition;
pub mod rest;
pub mod server;

pub use exposition::render_prometheus;
pub use rest::*;
pub use server::*;
