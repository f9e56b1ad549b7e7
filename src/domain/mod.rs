//! Domain layer - Provider contract and payload types
//!
//! This module defines the trait (port) that provider adapters implement,
//! and the provider-agnostic request/response types that flow through the
//! orchestrator and cache.

pub mod ports;

pub use ports::*;
