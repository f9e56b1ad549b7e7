//! Error types for the Provider Gateway
//!
//! Two layers of errors live here:
//! - [`OperationError`]: the failure value of any upstream-facing operation
//!   (transport calls, provider dispatch, batches). Immutable once built and
//!   carries enough context for an outer caller to decide on its own retry.
//! - [`Error`]: crate-level errors for startup, configuration, serialization
//!   and the HTTP surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// Operation Error Kind
// =============================================================================

/// Classification of an operation failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection reset, timeout, connection refused, name resolution failure
    TransientNetwork,
    /// Upstream answered with a 5xx status
    UpstreamServer,
    /// Upstream answered with 429
    RateLimited,
    /// Upstream answered with any other 4xx status
    UpstreamClient,
    /// Upstream answered with a malformed or unexpected body
    Protocol,
    /// Unknown provider or invalid configuration
    Configuration,
    /// A retryable failure persisted through every allowed attempt
    ExhaustedRetries,
    /// The transport (or gate) was torn down
    Closed,
}

impl ErrorKind {
    /// Whether this kind of failure is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::TransientNetwork | ErrorKind::UpstreamServer | ErrorKind::RateLimited
        )
    }

    /// Stable snake_case identifier, matching the serialized form
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TransientNetwork => "transient_network",
            ErrorKind::UpstreamServer => "upstream_server",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::UpstreamClient => "upstream_client",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Configuration => "configuration",
            ErrorKind::ExhaustedRetries => "exhausted_retries",
            ErrorKind::Closed => "closed",
        }
    }

    /// Classify an HTTP status code
    ///
    /// Returns `None` for success statuses.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            429 => Some(ErrorKind::RateLimited),
            500..=599 => Some(ErrorKind::UpstreamServer),
            400..=499 => Some(ErrorKind::UpstreamClient),
            100..=399 => None,
            _ => Some(ErrorKind::Protocol),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::TransientNetwork => write!(f, "transient network error"),
            ErrorKind::UpstreamServer => write!(f, "upstream server error"),
            ErrorKind::RateLimited => write!(f, "rate limited"),
            ErrorKind::UpstreamClient => write!(f, "upstream client error"),
            ErrorKind::Protocol => write!(f, "protocol error"),
            ErrorKind::Configuration => write!(f, "configuration error"),
            ErrorKind::ExhaustedRetries => write!(f, "retries exhausted"),
            ErrorKind::Closed => write!(f, "transport closed"),
        }
    }
}

// =============================================================================
// Operation Error
// =============================================================================

/// Uniform failure value for upstream-facing operations
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("{kind}: {message}")]
pub struct OperationError {
    /// Failure classification
    pub kind: ErrorKind,
    /// Human readable description
    pub message: String,
    /// Provider the failure belongs to, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    /// Whether an outer caller may retry (evaluated as if at attempt 0)
    pub retryable: bool,
    /// Upstream HTTP status, when a response was received
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Upstream response body (truncated), when a response was received
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Originating error code (e.g. `timeout`, `connect`, `http_503`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// When the failure was recorded
    pub occurred_at: DateTime<Utc>,
}

/// Error code carried by unknown-provider failures
pub const UNKNOWN_PROVIDER_CODE: &str = "unknown_provider";

/// Maximum number of body bytes kept on an error
const MAX_ERROR_BODY_LEN: usize = 2048;

impl OperationError {
    /// Create a new error of the given kind
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            provider_id: None,
            retryable: kind.is_retryable(),
            status: None,
            body: None,
            code: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransientNetwork, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn closed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Closed, message)
    }

    /// Unknown provider requested
    pub fn unknown_provider(provider_id: &str) -> Self {
        Self::configuration(format!("Unknown provider: {}", provider_id))
            .with_provider(provider_id)
            .with_code(UNKNOWN_PROVIDER_CODE)
    }

    /// Build an error from a non-success HTTP status
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let kind = ErrorKind::from_status(status).unwrap_or(ErrorKind::Protocol);
        Self::new(kind, format!("Upstream responded with HTTP {}", status))
            .with_status(status)
            .with_body(body)
            .with_code(format!("http_{}", status))
    }

    /// Attach the provider id
    pub fn with_provider(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    /// Attach the upstream status
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Attach the upstream body, truncated to a bounded length
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        let mut body = body.into();
        if body.len() > MAX_ERROR_BODY_LEN {
            let mut cut = MAX_ERROR_BODY_LEN;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        if !body.is_empty() {
            self.body = Some(body);
        }
        self
    }

    /// Attach the originating error code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Re-tag an error as exhausted retries, keeping its context.
    ///
    /// `retryable` still reflects the underlying failure so a higher level
    /// may try a different provider.
    pub fn into_exhausted(mut self, attempts: u32) -> Self {
        self.message = format!("{} (after {} attempts)", self.message, attempts);
        self.retryable = self.kind.is_retryable();
        self.kind = ErrorKind::ExhaustedRetries;
        self
    }

    /// Convert a reqwest failure into an operation error
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        let code = if err.is_timeout() {
            "timeout"
        } else if err.is_connect() {
            "connect"
        } else if err.is_request() {
            "request"
        } else if err.is_body() {
            "body"
        } else if err.is_decode() {
            "decode"
        } else if err.is_builder() {
            "builder"
        } else {
            "network"
        };

        let kind = if err.is_builder() {
            ErrorKind::Configuration
        } else if err.is_decode() {
            ErrorKind::Protocol
        } else if let Some(status) = err.status() {
            ErrorKind::from_status(status.as_u16()).unwrap_or(ErrorKind::Protocol)
        } else {
            ErrorKind::TransientNetwork
        };

        let mut op = Self::new(kind, err.to_string()).with_code(code);
        if let Some(status) = err.status() {
            op = op.with_status(status.as_u16());
        }
        op
    }
}

// =============================================================================
// Crate Error
// =============================================================================

/// Unified error type for startup, configuration and the HTTP surface
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Operation Errors
    // =========================================================================
    #[error(transparent)]
    Operation(#[from] OperationError),

    #[error("Provider construction failed: {provider} - {reason}")]
    ProviderConstruction { provider: String, reason: String },

    #[error("Cache tier error: {tier} - {reason}")]
    CacheTier { tier: String, reason: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Operation(op) => op.retryable,
            Error::CacheTier { .. } | Error::Io(_) => true,
            _ => false,
        }
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Operation(op) => op.kind == ErrorKind::TransientNetwork,
            Error::CacheTier { .. } => true,
            _ => false,
        }
    }
}

/// Result type alias for crate-level operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for upstream-facing operations
pub type OpResult<T> = std::result::Result<T, OperationError>;
