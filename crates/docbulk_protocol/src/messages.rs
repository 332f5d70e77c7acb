//! Request and response messages.

use crate::error::{ProtocolError, ProtocolResult};
use crate::operation::OpType;
use crate::token::ConcurrencyToken;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Coarse classification of a failed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCategory {
    /// The supplied concurrency token no longer matches the stored version.
    Conflict,
    /// The document (or index) does not exist.
    NotFound,
    /// Anything else.
    Other,
}

impl FailureCategory {
    /// Maps an HTTP status code to a category.
    pub fn from_status(status: u16) -> Self {
        match status {
            409 => FailureCategory::Conflict,
            404 => FailureCategory::NotFound,
            _ => FailureCategory::Other,
        }
    }
}

/// Error detail attached to a failed item or request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCause {
    /// Machine readable error type, e.g. `version_conflict_engine_exception`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Human readable reason.
    pub reason: String,
}

impl ErrorCause {
    /// Creates an error cause.
    pub fn new(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            reason: reason.into(),
        }
    }
}

/// Body of a non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error detail.
    pub error: ErrorCause,
    /// HTTP status.
    pub status: u16,
}

/// Outcome of one bulk item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResult {
    /// Index the item was applied to.
    #[serde(rename = "_index", default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    /// Document id (assigned by the store for id-less creates).
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// HTTP-equivalent status of the item.
    pub status: u16,
    /// Sequence number after the write.
    #[serde(rename = "_seq_no", default, skip_serializing_if = "Option::is_none")]
    pub seq_no: Option<u64>,
    /// Primary term after the write.
    #[serde(rename = "_primary_term", default, skip_serializing_if = "Option::is_none")]
    pub primary_term: Option<u64>,
    /// `created`, `updated`, `deleted`, `not_found`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Failure detail, present only for failed items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorCause>,
}

impl ItemResult {
    /// Returns true if the item was applied.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && (200..300).contains(&self.status)
    }

    /// Returns the category of a failed item, `None` on success.
    pub fn category(&self) -> Option<FailureCategory> {
        if self.is_success() {
            None
        } else {
            Some(FailureCategory::from_status(self.status))
        }
    }

    /// Returns the new document version, if reported.
    pub fn token(&self) -> Option<ConcurrencyToken> {
        ConcurrencyToken::from_parts(self.seq_no, self.primary_term)
            .ok()
            .flatten()
    }

    /// Returns the failure message, empty on success.
    pub fn failure_message(&self) -> String {
        self.error
            .as_ref()
            .map(|e| format!("{}: {}", e.kind, e.reason))
            .unwrap_or_default()
    }
}

/// One entry of the bulk response `items` array, keyed by action type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkItemResponse {
    /// Response to a create action.
    Create(ItemResult),
    /// Response to an index action.
    Index(ItemResult),
    /// Response to a delete action.
    Delete(ItemResult),
}

impl BulkItemResponse {
    /// Wraps an item result under the given action type.
    pub fn new(op_type: OpType, result: ItemResult) -> Self {
        match op_type {
            OpType::Create => BulkItemResponse::Create(result),
            OpType::Index => BulkItemResponse::Index(result),
            OpType::Delete => BulkItemResponse::Delete(result),
        }
    }

    /// Returns the action type.
    pub fn op_type(&self) -> OpType {
        match self {
            BulkItemResponse::Create(_) => OpType::Create,
            BulkItemResponse::Index(_) => OpType::Index,
            BulkItemResponse::Delete(_) => OpType::Delete,
        }
    }

    /// Returns the item result.
    pub fn result(&self) -> &ItemResult {
        match self {
            BulkItemResponse::Create(r) | BulkItemResponse::Index(r) | BulkItemResponse::Delete(r) => r,
        }
    }

    /// Consumes the entry and returns the item result.
    pub fn into_result(self) -> ItemResult {
        match self {
            BulkItemResponse::Create(r) | BulkItemResponse::Index(r) | BulkItemResponse::Delete(r) => r,
        }
    }
}

/// Response to a bulk request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkResponse {
    /// Milliseconds spent by the store.
    #[serde(default)]
    pub took: u64,
    /// True if any item failed.
    pub errors: bool,
    /// Per-item outcomes, index-aligned with the request actions.
    pub items: Vec<BulkItemResponse>,
}

impl BulkResponse {
    /// Builds a response, deriving the `errors` flag from the items.
    pub fn new(took: u64, items: Vec<BulkItemResponse>) -> Self {
        let errors = items.iter().any(|i| !i.result().is_success());
        Self { took, errors, items }
    }
}

/// Response to a single-document read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetResponse {
    /// Index name.
    #[serde(rename = "_index", default)]
    pub index: String,
    /// Document id.
    #[serde(rename = "_id")]
    pub id: String,
    /// Whether the document exists.
    pub found: bool,
    /// Current sequence number.
    #[serde(rename = "_seq_no", default, skip_serializing_if = "Option::is_none")]
    pub seq_no: Option<u64>,
    /// Current primary term.
    #[serde(rename = "_primary_term", default, skip_serializing_if = "Option::is_none")]
    pub primary_term: Option<u64>,
    /// Stored document.
    #[serde(rename = "_source", default, skip_serializing_if = "Option::is_none")]
    pub source: Option<serde_json::Value>,
}

impl GetResponse {
    /// Returns the current version.
    pub fn token(&self) -> ProtocolResult<Option<ConcurrencyToken>> {
        ConcurrencyToken::from_parts(self.seq_no, self.primary_term)
    }

    /// Returns the stored document as compact JSON bytes.
    pub fn source_bytes(&self) -> ProtocolResult<Option<Vec<u8>>> {
        self.source
            .as_ref()
            .map(serde_json::to_vec)
            .transpose()
            .map_err(ProtocolError::from)
    }
}

/// Response to a single-document write or delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResponse {
    /// Index name.
    #[serde(rename = "_index", default)]
    pub index: String,
    /// Document id.
    #[serde(rename = "_id")]
    pub id: String,
    /// `created`, `updated` or `deleted`.
    pub result: String,
    /// Sequence number after the write.
    #[serde(rename = "_seq_no")]
    pub seq_no: u64,
    /// Primary term after the write.
    #[serde(rename = "_primary_term")]
    pub primary_term: u64,
}

impl WriteResponse {
    /// Returns the new document version.
    pub fn token(&self) -> ConcurrencyToken {
        ConcurrencyToken::new(self.primary_term, self.seq_no)
    }
}

/// Body of a search request. The scroll TTL travels as a query parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Opaque query; `None` matches everything.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<serde_json::Value>,
    /// Page size.
    pub size: u32,
    /// Ask the store to include versions in hits.
    #[serde(default)]
    pub seq_no_primary_term: bool,
}

impl SearchRequest {
    /// Creates a search request that asks for hit versions.
    pub fn new(query: Option<serde_json::Value>, size: u32) -> Self {
        Self {
            query,
            size,
            seq_no_primary_term: true,
        }
    }
}

/// Relation between the reported total and the true number of matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TotalRelation {
    /// The total is exact.
    #[serde(rename = "eq")]
    Exact,
    /// The total is a lower bound.
    #[serde(rename = "gte")]
    LowerBound,
}

/// Total number of matches for a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalHits {
    /// Number of matches.
    pub value: u64,
    /// Whether `value` is exact.
    pub relation: TotalRelation,
}

impl TotalHits {
    /// An exact total.
    pub fn exact(value: u64) -> Self {
        Self {
            value,
            relation: TotalRelation::Exact,
        }
    }

    /// Returns true if the total is exact.
    pub fn is_exact(&self) -> bool {
        self.relation == TotalRelation::Exact
    }
}

/// A hit as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawHit {
    /// Index name.
    #[serde(rename = "_index", default)]
    pub index: String,
    /// Document id.
    #[serde(rename = "_id")]
    pub id: String,
    /// Sequence number, when requested.
    #[serde(rename = "_seq_no", default, skip_serializing_if = "Option::is_none")]
    pub seq_no: Option<u64>,
    /// Primary term, when requested.
    #[serde(rename = "_primary_term", default, skip_serializing_if = "Option::is_none")]
    pub primary_term: Option<u64>,
    /// Stored document.
    #[serde(rename = "_source", default, skip_serializing_if = "Option::is_none")]
    pub source: Option<serde_json::Value>,
}

/// The `hits` object of a search response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitsEnvelope {
    /// Total matches.
    pub total: TotalHits,
    /// Hits of this page.
    pub hits: Vec<RawHit>,
}

/// Response to a search or scroll request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Cursor handle for the next page, present for scrolling searches.
    #[serde(rename = "_scroll_id", default, skip_serializing_if = "Option::is_none")]
    pub scroll_id: Option<String>,
    /// Milliseconds spent by the store.
    #[serde(default)]
    pub took: u64,
    /// Page of hits.
    pub hits: HitsEnvelope,
}

impl SearchResponse {
    /// Converts the wire response into a page of decoded hits.
    pub fn into_page(self) -> ProtocolResult<SearchPage> {
        let hits = self
            .hits
            .hits
            .into_iter()
            .map(SearchHit::try_from)
            .collect::<ProtocolResult<Vec<_>>>()?;
        Ok(SearchPage {
            hits,
            total: self.hits.total,
            scroll_id: self.scroll_id,
        })
    }
}

/// A search hit with its source as compact JSON bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    /// Document id.
    pub id: String,
    /// Document version, when the store reported it.
    pub token: Option<ConcurrencyToken>,
    /// Document source; `{}` if the store returned none.
    pub source: Vec<u8>,
}

impl TryFrom<RawHit> for SearchHit {
    type Error = ProtocolError;

    fn try_from(raw: RawHit) -> ProtocolResult<Self> {
        let token = ConcurrencyToken::from_parts(raw.seq_no, raw.primary_term)?;
        let source = match raw.source {
            Some(value) => serde_json::to_vec(&value)?,
            None => b"{}".to_vec(),
        };
        Ok(Self {
            id: raw.id,
            token,
            source,
        })
    }
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPage {
    /// Hits of this page.
    pub hits: Vec<SearchHit>,
    /// Total matches.
    pub total: TotalHits,
    /// Cursor handle for the next page.
    pub scroll_id: Option<String>,
}

/// Request for the next page of a scroll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrollRequest {
    /// Lease extension, e.g. `60s`.
    pub scroll: String,
    /// Cursor handle.
    pub scroll_id: String,
}

/// Request to release scroll cursors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearScrollRequest {
    /// Cursor handles to release.
    pub scroll_id: Vec<String>,
}

/// Response to a clear-scroll request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearScrollResponse {
    /// True if every handle was released.
    pub succeeded: bool,
    /// Number of cursors freed.
    pub num_freed: u32,
}

/// Body of a count request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CountRequest {
    /// Opaque query; `None` counts everything.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<serde_json::Value>,
}

/// Response to a count request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountResponse {
    /// Number of matching documents.
    pub count: u64,
}

/// Formats a TTL as a whole number of seconds (`90s`), rounding up to at
/// least one second.
pub fn format_ttl(ttl: Duration) -> String {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    format!("{}s", secs.max(1))
}

/// Parses a time value such as `500ms`, `30s`, `1m` or `2h`.
pub fn parse_ttl(value: &str) -> ProtocolResult<Duration> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| ProtocolError::InvalidDuration(value.to_string()))?;
    let (number, unit) = value.split_at(split);
    let number: u64 = number
        .parse()
        .map_err(|_| ProtocolError::InvalidDuration(value.to_string()))?;
    match unit {
        "ms" => Ok(Duration::from_millis(number)),
        "s" => Ok(Duration::from_secs(number)),
        "m" => Ok(Duration::from_secs(number * 60)),
        "h" => Ok(Duration::from_secs(number * 3600)),
        _ => Err(ProtocolError::InvalidDuration(value.to_string())),
    }
}
