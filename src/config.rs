//! Gateway Configuration
//!
//! YAML configuration file for the gateway binary:
//!
//! ```yaml
//! api:
//!   rest_addr: 0.0.0.0:8090
//! orchestrator:
//!   health:
//!     interval_ms: 30000
//!   providers:
//!     books:
//!       base_url: https://books.example.com/api
//!       transport:
//!         max_sockets: 20
//!       cache:
//!         capacity: 5000
//! ```

use crate::controlplane::{ApiServerConfig, OrchestratorConfig};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Top-level gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub api: ApiServerConfig,
    pub orchestrator: OrchestratorConfig,
}

impl GatewayConfig {
    /// Load and validate a YAML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Cannot read config {}: {}", path.display(), e))
        })?;
        let config = Self::from_yaml_str(&raw)?;
        debug!(
            path = %path.display(),
            providers = config.orchestrator.providers.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Parse and validate YAML configuration
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section, including each provider
    ///
    /// The orchestrator tolerates a bad provider at runtime; a config file
    /// is rejected up front instead.
    pub fn validate(&self) -> Result<()> {
        self.orchestrator.validate()?;
        for (id, provider) in &self.orchestrator.providers {
            if provider.base_url.is_empty() {
                return Err(Error::Configuration(format!(
                    "provider '{}': base_url is required",
                    id
                )));
            }
            provider
                .validate()
                .map_err(|e| Error::Configuration(format!("provider '{}': {}", id, e)))?;
        }
        Ok(())
    }
}
