//! Generic JSON-over-HTTP Provider
//!
//! Maps the provider contract onto a configurable set of GET endpoints and
//! reads the payload through JSON pointers, so simple upstreams need no code.

use crate::domain::ports::{
    AuxiliaryData, ItemDetail, Provider, SearchItem, SearchQuery, SearchResult,
};
use crate::error::{Error, OpResult, OperationError, Result};
use crate::transport::{Transport, TransportRequest};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Placeholder substituted with the URL-encoded item id
pub const ID_PLACEHOLDER: &str = "{id}";

// =============================================================================
// Endpoint Configuration
// =============================================================================

/// Endpoint layout of an `http-json` upstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpJsonEndpoints {
    /// Search path relative to the base URL
    pub search_path: String,
    pub query_param: String,
    pub limit_param: String,
    pub offset_param: String,
    /// JSON pointer to the hit array ("" = whole body)
    pub items_pointer: String,
    /// JSON pointer to the total hit count
    pub total_pointer: Option<String>,
    /// Field holding the item id
    pub id_field: String,
    /// Field holding the item title
    pub title_field: String,
    /// Item path, must contain `{id}`
    pub item_path: String,
    /// Query parameter carrying the requested quality
    pub quality_param: String,
    /// JSON pointer to the item payload
    pub item_pointer: String,
    /// Auxiliary path; `None` means the upstream has none
    pub auxiliary_path: Option<String>,
    /// JSON pointer to the auxiliary entry array
    pub auxiliary_pointer: String,
}

impl Default for HttpJsonEndpoints {
    fn default() -> Self {
        Self {
            search_path: "/search".to_string(),
            query_param: "q".to_string(),
            limit_param: "limit".to_string(),
            offset_param: "offset".to_string(),
            items_pointer: "/results".to_string(),
            total_pointer: Some("/total".to_string()),
            id_field: "id".to_string(),
            title_field: "title".to_string(),
            item_path: "/items/{id}".to_string(),
            quality_param: "quality".to_string(),
            item_pointer: String::new(),
            auxiliary_path: None,
            auxiliary_pointer: String::new(),
        }
    }
}

// =============================================================================
// HTTP JSON Provider
// =============================================================================

/// Provider adapter for generic JSON APIs
#[derive(Debug, Clone)]
pub struct HttpJsonProvider {
    id: String,
    base_url: String,
    endpoints: HttpJsonEndpoints,
}

impl HttpJsonProvider {
    pub const KIND: &'static str = "http-json";

    /// Create a new adapter
    pub fn new(id: impl Into<String>, base_url: &str, endpoints: HttpJsonEndpoints) -> Result<Self> {
        let id = id.into();
        let base_url = base_url.trim_end_matches('/');

        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(Error::Configuration(format!(
                "provider {} needs an http(s) base_url, got '{}'",
                id, base_url
            )));
        }
        if !endpoints.item_path.contains(ID_PLACEHOLDER) {
            return Err(Error::Configuration(format!(
                "provider {} item_path must contain {}",
                id, ID_PLACEHOLDER
            )));
        }

        Ok(Self {
            id,
            base_url: base_url.to_string(),
            endpoints,
        })
    }

    pub fn endpoints(&self) -> &HttpJsonEndpoints {
        &self.endpoints
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn item_url(&self, path: &str, item_id: &str) -> String {
        self.url(&path.replace(ID_PLACEHOLDER, &urlencoding::encode(item_id)))
    }

    fn shape_error(&self, what: &str, pointer: &str) -> OperationError {
        OperationError::protocol(format!(
            "Unexpected response shape: {} not found at '{}'",
            what, pointer
        ))
        .with_provider(self.id.as_str())
        .with_code("shape")
    }

    fn parse_item(&self, value: &Value) -> OpResult<SearchItem> {
        let object = value
            .as_object()
            .ok_or_else(|| self.shape_error("item object", &self.endpoints.items_pointer))?;

        let id = match object.get(&self.endpoints.id_field) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(self.shape_error("item id", &self.endpoints.id_field)),
        };
        let title = object
            .get(&self.endpoints.title_field)
            .and_then(Value::as_str)
            .map(str::to_string);

        let attributes = object
            .iter()
            .filter(|(k, _)| **k != self.endpoints.id_field && **k != self.endpoints.title_field)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(SearchItem {
            id,
            title,
            attributes,
        })
    }
}

#[async_trait]
impl Provider for HttpJsonProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &str {
        Self::KIND
    }

    async fn search(&self, transport: &Transport, query: &SearchQuery) -> OpResult<SearchResult> {
        let ep = &self.endpoints;
        let mut request = TransportRequest::get(self.url(&ep.search_path))
            .with_query(ep.query_param.as_str(), query.query.as_str())
            .with_query(ep.limit_param.as_str(), query.limit.to_string())
            .with_query(ep.offset_param.as_str(), query.offset.to_string());
        for (key, value) in &query.filters {
            request = request.with_query(key.as_str(), value.as_str());
        }

        let body: Value = transport.execute(request).await?.json()?;

        let hits = body
            .pointer(&ep.items_pointer)
            .and_then(Value::as_array)
            .ok_or_else(|| self.shape_error("result array", &ep.items_pointer))?;
        let items = hits
            .iter()
            .map(|hit| self.parse_item(hit))
            .collect::<OpResult<Vec<_>>>()?;
        let total = ep
            .total_pointer
            .as_deref()
            .and_then(|p| body.pointer(p))
            .and_then(Value::as_u64);

        debug!(provider = %self.id, query = %query.query, hits = items.len(), "Search completed");

        Ok(SearchResult {
            provider_id: self.id.clone(),
            query: query.query.clone(),
            items,
            total,
            offset: query.offset,
        })
    }

    async fn fetch_item(
        &self,
        transport: &Transport,
        item_id: &str,
        quality: Option<&str>,
    ) -> OpResult<ItemDetail> {
        let ep = &self.endpoints;
        let mut request = TransportRequest::get(self.item_url(&ep.item_path, item_id));
        if let Some(quality) = quality {
            request = request.with_query(ep.quality_param.as_str(), quality);
        }

        let body: Value = transport.execute(request).await?.json()?;
        let data = body
            .pointer(&ep.item_pointer)
            .cloned()
            .ok_or_else(|| self.shape_error("item payload", &ep.item_pointer))?;

        Ok(ItemDetail {
            provider_id: self.id.clone(),
            id: item_id.to_string(),
            quality: quality.map(str::to_string),
            data,
        })
    }

    async fn fetch_auxiliary(&self, transport: &Transport, item_id: &str) -> AuxiliaryData {
        let Some(path) = self.endpoints.auxiliary_path.as_deref() else {
            return AuxiliaryData::empty(item_id);
        };

        let request = TransportRequest::get(self.item_url(path, item_id));
        let body = match transport.execute(request).await.and_then(|r| r.json::<Value>()) {
            Ok(body) => body,
            Err(e) => {
                warn!(provider = %self.id, item = %item_id, error = %e, "Auxiliary fetch failed");
                return AuxiliaryData::empty(item_id);
            }
        };

        let entries = body
            .pointer(&self.endpoints.auxiliary_pointer)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        AuxiliaryData {
            item_id: item_id.to_string(),
            entries,
        }
    }
}
