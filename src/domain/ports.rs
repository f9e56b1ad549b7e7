//! Domain Ports - Core trait definitions for the provider gateway
//!
//! These traits define the boundary between the orchestrator and the
//! provider-specific request/parse logic. Adapters implement [`Provider`] to
//! plug a new upstream in; transport, retry and caching stay outside them.

use crate::cache::CacheKey;
use crate::error::OpResult;
use crate::transport::Transport;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Search Types
// =============================================================================

/// Default page size for searches
pub const DEFAULT_SEARCH_LIMIT: u32 = 20;

/// A provider-agnostic search request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    /// Free-text query
    pub query: String,
    /// Page size
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Page offset (items skipped)
    #[serde(default)]
    pub offset: u32,
    /// Provider-specific filters, passed through as query parameters
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
}

fn default_limit() -> u32 {
    DEFAULT_SEARCH_LIMIT
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: DEFAULT_SEARCH_LIMIT,
            offset: 0,
            filters: BTreeMap::new(),
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }
}

/// One search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchItem {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Remaining upstream fields, untouched
    #[serde(flatten)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// A page of search hits from one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub provider_id: String,
    pub query: String,
    pub items: Vec<SearchItem>,
    /// Total hits upstream, when the provider reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    pub offset: u32,
}

// =============================================================================
// Item Types
// =============================================================================

/// Full detail of one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDetail {
    pub provider_id: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    /// Upstream payload
    pub data: serde_json::Value,
}

/// Non-critical data attached to an item
///
/// Providers return the default value when it cannot be fetched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuxiliaryData {
    pub item_id: String,
    #[serde(default)]
    pub entries: Vec<serde_json::Value>,
}

impl AuxiliaryData {
    pub fn empty(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            entries: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Operations
// =============================================================================

/// A provider-agnostic operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Search(SearchQuery),
    #[serde(rename_all = "camelCase")]
    FetchItem {
        item_id: String,
        #[serde(default)]
        quality: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    FetchAuxiliary { item_id: String },
}

impl Operation {
    pub fn search(query: impl Into<String>) -> Self {
        Operation::Search(SearchQuery::new(query))
    }

    pub fn fetch_item(item_id: impl Into<String>, quality: Option<String>) -> Self {
        Operation::FetchItem {
            item_id: item_id.into(),
            quality,
        }
    }

    pub fn fetch_auxiliary(item_id: impl Into<String>) -> Self {
        Operation::FetchAuxiliary {
            item_id: item_id.into(),
        }
    }

    /// Operation name used in cache keys and logs
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Search(_) => "search",
            Operation::FetchItem { .. } => "item",
            Operation::FetchAuxiliary { .. } => "auxiliary",
        }
    }

    /// Arguments in a fixed order, used as cache key components
    pub fn args(&self) -> Vec<String> {
        match self {
            Operation::Search(q) => {
                let mut args = vec![q.query.clone(), q.limit.to_string(), q.offset.to_string()];
                args.extend(q.filters.iter().map(|(k, v)| format!("{}={}", k, v)));
                args
            }
            Operation::FetchItem { item_id, quality } => vec![
                item_id.clone(),
                quality.clone().unwrap_or_else(|| "default".to_string()),
            ],
            Operation::FetchAuxiliary { item_id } => vec![item_id.clone()],
        }
    }

    /// Storage key of this operation's result in `namespace`
    pub fn cache_key(&self, namespace: &str) -> String {
        CacheKey::new(namespace, self.name())
            .args(self.args())
            .to_storage_key()
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name(), self.args().join(", "))
    }
}

/// The value an operation produces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum OperationOutput {
    Search(SearchResult),
    Item(ItemDetail),
    Auxiliary(AuxiliaryData),
}

// =============================================================================
// Provider Trait
// =============================================================================

/// Provider-specific request construction and response parsing
///
/// Implementations must not retry or cache; the orchestrator and the
/// transport own those concerns.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider id (unique within a gateway)
    fn id(&self) -> &str;

    /// Adapter kind, e.g. `http-json`
    fn kind(&self) -> &str;

    /// Run a search
    async fn search(&self, transport: &Transport, query: &SearchQuery) -> OpResult<SearchResult>;

    /// Fetch one item, optionally at a given quality
    async fn fetch_item(
        &self,
        transport: &Transport,
        item_id: &str,
        quality: Option<&str>,
    ) -> OpResult<ItemDetail>;

    /// Fetch non-critical auxiliary data; never fails
    async fn fetch_auxiliary(&self, transport: &Transport, item_id: &str) -> AuxiliaryData;

    /// Cheap representative call used by health probing
    async fn probe(&self, transport: &Transport, query: &str) -> OpResult<()> {
        self.search(transport, &SearchQuery::new(query).with_limit(1))
            .await
            .map(|_| ())
    }

    /// Run any operation
    async fn execute(&self, transport: &Transport, operation: &Operation) -> OpResult<OperationOutput> {
        match operation {
            Operation::Search(query) => self.search(transport, query).await.map(OperationOutput::Search),
            Operation::FetchItem { item_id, quality } => self
                .fetch_item(transport, item_id, quality.as_deref())
                .await
                .map(OperationOutput::Item),
            Operation::FetchAuxiliary { item_id } => Ok(OperationOutput::Auxiliary(
                self.fetch_auxiliary(transport, item_id).await,
            )),
        }
    }
}

/// Shared provider handle
pub type ProviderRef = Arc<dyn Provider>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_names_and_args() {
        let search = Operation::Search(
            SearchQuery::new("rust")
                .with_limit(5)
                .with_filter("lang", "en")
                .with_filter("year", "2024"),
        );
        assert_eq!(search.name(), "search");
        assert_eq!(search.args(), vec!["rust", "5", "0", "lang=en", "year=2024"]);

        let item = Operation::fetch_item("42", None);
        assert_eq!(item.args(), vec!["42", "default"]);
        assert_eq!(item.to_string(), "item(42, default)");

        let aux = Operation::fetch_auxiliary("42");
        assert_eq!(aux.name(), "auxiliary");
        assert_eq!(aux.cache_key("alpha"), "alpha:auxiliary:42");
    }

    #[test]
    fn test_cache_keys_do_not_collide_on_separator() {
        let split_id = Operation::fetch_item("a:hd", None);
        let split_quality = Operation::fetch_item("a", Some("hd:default".into()));
        assert_ne!(split_id.cache_key("p"), split_quality.cache_key("p"));
        assert_eq!(split_id.cache_key("p"), "p:item:a%3Ahd:default");
    }

    #[test]
    fn test_operation_json_shape() {
        let op: Operation =
            serde_json::from_str(r#"{"op":"fetch_item","itemId":"7","quality":"hd"}"#).unwrap();
        assert_eq!(op, Operation::fetch_item("7", Some("hd".into())));

        let op: Operation = serde_json::from_str(r#"{"op":"search","query":"x"}"#).unwrap();
        assert_eq!(op, Operation::search("x"));
    }

    #[test]
    fn test_output_roundtrip_through_json() {
        let output = OperationOutput::Auxiliary(AuxiliaryData::empty("9"));
        let bytes = serde_json::to_vec(&output).unwrap();
        let back: OperationOutput = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, output);
    }

    #[test]
    fn test_search_item_keeps_extra_fields() {
        let item: SearchItem =
            serde_json::from_str(r#"{"id":"1","title":"t","year":2020}"#).unwrap();
        assert_eq!(item.title.as_deref(), Some("t"));
        assert_eq!(item.attributes.get("year"), Some(&serde_json::json!(2020)));
    }
}
