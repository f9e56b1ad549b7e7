//! Cache Entry Types
//!
//! Defines cache keys and the entries held by the in-process tier.

use crate::error::{Error, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::borrow::Cow;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

// =============================================================================
// Cache Key
// =============================================================================

/// Separator between cache key components
pub const KEY_SEPARATOR: char = ':';

/// Escape `%` and the separator inside one key component
///
/// Keeps distinct component lists from joining into the same key.
fn escape_component(component: &str) -> Cow<'_, str> {
    if !component.contains(|c| c == '%' || c == KEY_SEPARATOR) {
        return Cow::Borrowed(component);
    }
    let mut escaped = String::with_capacity(component.len() + 4);
    for c in component.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            KEY_SEPARATOR => escaped.push_str("%3A"),
            c => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}

/// Compile a glob pattern over storage keys
pub fn compile_key_pattern(pattern: &str) -> Result<glob::Pattern> {
    glob::Pattern::new(pattern)
        .map_err(|e| Error::Configuration(format!("invalid key pattern '{}': {}", pattern, e)))
}

/// Structured cache key: `namespace:operation:arg1:arg2:...`
///
/// The cache itself treats keys as opaque strings; this type only composes
/// them deterministically. A `%` or `:` inside a component is
/// percent-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Namespace (provider id)
    pub namespace: String,
    /// Operation name
    pub operation: String,
    /// Operation arguments in call order
    pub args: Vec<String>,
}

impl CacheKey {
    /// Create a new cache key
    pub fn new(namespace: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            operation: operation.into(),
            args: Vec::new(),
        }
    }

    /// Append an argument component
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several argument components
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Colon-joined storage key
    pub fn to_storage_key(&self) -> String {
        let mut key = String::with_capacity(
            self.namespace.len()
                + self.operation.len()
                + self.args.iter().map(|a| a.len() + 1).sum::<usize>()
                + 1,
        );
        key.push_str(&escape_component(&self.namespace));
        key.push(KEY_SEPARATOR);
        key.push_str(&escape_component(&self.operation));
        for arg in &self.args {
            key.push(KEY_SEPARATOR);
            key.push_str(&escape_component(arg));
        }
        key
    }

    /// Glob pattern matching every key of a namespace
    pub fn namespace_pattern(namespace: &str) -> String {
        format!(
            "{}{}*",
            glob::Pattern::escape(&escape_component(namespace)),
            KEY_SEPARATOR
        )
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_storage_key())
    }
}

impl From<&CacheKey> for String {
    fn from(key: &CacheKey) -> Self {
        key.to_storage_key()
    }
}

// =============================================================================
// Cache Entry
// =============================================================================

/// A cached value with expiry and access metadata
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Storage key
    pub key: String,
    /// Opaque cached value
    pub value: Bytes,
    /// Time-to-live from creation
    pub ttl: Duration,
    /// Monotonic creation time (expiry reference)
    pub created_at: Instant,
    /// Monotonic time of the last read or write
    pub last_accessed_at: Instant,
    /// Number of reads served
    pub access_count: u64,
    /// Wall-clock creation time, for reporting
    pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Create a new entry
    pub fn new(key: impl Into<String>, value: Bytes, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            key: key.into(),
            value,
            ttl,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            cached_at: Utc::now(),
        }
    }

    /// Logically absent once `now - created_at > ttl`
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Record a read
    pub fn record_access(&mut self, now: Instant) {
        self.last_accessed_at = now;
        self.access_count += 1;
    }

    /// Approximate memory footprint (key + value)
    pub fn estimated_size(&self) -> u64 {
        (self.key.len() + self.value.len()) as u64
    }

    /// Remaining lifetime
    pub fn remaining_ttl(&self) -> Duration {
        self.ttl
            .saturating_sub(Instant::now().saturating_duration_since(self.created_at))
    }
}
