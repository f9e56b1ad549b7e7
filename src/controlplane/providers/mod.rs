//! Provider Adapters
//!
//! Provides the adapters the gateway can build from configuration:
//! - `http-json`: generic JSON-over-HTTP upstream driven by endpoint config
//!
//! Further kinds are registered on a [`ProviderFactory`] at startup.

pub mod http_json;

pub use http_json::{HttpJsonEndpoints, HttpJsonProvider};

use crate::cache::CacheConfig;
use crate::domain::ports::ProviderRef;
use crate::error::{Error, Result};
use crate::transport::TransportConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Provider Configuration
// =============================================================================

/// Configuration for one upstream provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Adapter kind, resolved through the factory
    pub kind: String,
    /// Upstream base URL
    pub base_url: String,
    /// Transport (pool, timeouts, retry) settings
    pub transport: TransportConfig,
    /// Cache settings
    pub cache: CacheConfig,
    /// Endpoint layout for `http-json`
    pub endpoints: HttpJsonEndpoints,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: HttpJsonProvider::KIND.to_string(),
            base_url: String::new(),
            transport: TransportConfig::default(),
            cache: CacheConfig::default(),
            endpoints: HttpJsonEndpoints::default(),
        }
    }
}

impl ProviderConfig {
    pub fn http_json(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Validate transport and cache settings
    pub fn validate(&self) -> Result<()> {
        self.transport.validate()?;
        self.cache.validate()
    }
}

// =============================================================================
// Provider Factory
// =============================================================================

/// Builds a provider from its id and configuration
pub type ProviderConstructor =
    Arc<dyn Fn(&str, &ProviderConfig) -> Result<ProviderRef> + Send + Sync>;

/// Factory for creating provider adapters by kind
#[derive(Clone)]
pub struct ProviderFactory {
    constructors: BTreeMap<String, ProviderConstructor>,
}

impl ProviderFactory {
    /// Factory with no kinds registered
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Factory with the built-in kinds registered
    pub fn new() -> Self {
        let mut factory = Self::empty();
        factory.register(HttpJsonProvider::KIND, |id, config| {
            let provider = HttpJsonProvider::new(id, &config.base_url, config.endpoints.clone())?;
            Ok(Arc::new(provider) as ProviderRef)
        });
        factory
    }

    /// Register (or replace) the constructor for a kind
    pub fn register<F>(&mut self, kind: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(&str, &ProviderConfig) -> Result<ProviderRef> + Send + Sync + 'static,
    {
        self.constructors
            .insert(kind.into().to_lowercase(), Arc::new(constructor));
        self
    }

    /// Create a provider adapter
    pub fn create(&self, id: &str, config: &ProviderConfig) -> Result<ProviderRef> {
        let constructor = self
            .constructors
            .get(&config.kind.to_lowercase())
            .ok_or_else(|| Error::ProviderConstruction {
                provider: id.to_string(),
                reason: format!("unknown provider kind '{}'", config.kind),
            })?;

        constructor(id, config).map_err(|e| match e {
            Error::ProviderConstruction { .. } => e,
            other => Error::ProviderConstruction {
                provider: id.to_string(),
                reason: other.to_string(),
            },
        })
    }

    /// Registered kinds
    pub fn kinds(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }
}

impl Default for ProviderFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProviderFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderFactory")
            .field("kinds", &self.kinds())
            .finish()
    }
}
