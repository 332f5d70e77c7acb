//! Transport abstraction between the client and a document store.

use crate::error::{ClientError, ClientResult};
use docbulk_protocol::{
    BulkAction, BulkItemResponse, ConcurrencyToken, ItemResult, OpType, RefreshPolicy,
    SearchPage, SearchRequest, TotalHits,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// A stored document together with its current version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedDocument {
    /// Document id.
    pub id: String,
    /// Current version.
    pub token: ConcurrencyToken,
    /// Source as JSON bytes.
    pub source: Vec<u8>,
}

/// How a single-document write treats an existing document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Fail with a conflict if the id exists.
    Create,
    /// Create or replace.
    Index,
}

impl WriteMode {
    /// Returns the `op_type` parameter value.
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Create => "create",
            WriteMode::Index => "index",
        }
    }
}

/// A single-document write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    /// Document id; `None` lets the store assign one.
    pub id: Option<String>,
    /// Source as JSON bytes.
    pub payload: Vec<u8>,
    /// Required current version.
    pub token: Option<ConcurrencyToken>,
    /// Create or index.
    pub mode: WriteMode,
    /// Visibility policy.
    pub refresh: RefreshPolicy,
}

impl WriteRequest {
    /// An unconditional index write.
    pub fn index(id: Option<String>, payload: Vec<u8>) -> Self {
        Self {
            id,
            payload,
            token: None,
            mode: WriteMode::Index,
            refresh: RefreshPolicy::None,
        }
    }

    /// An index write guarded by a concurrency token.
    pub fn conditional(id: impl Into<String>, payload: Vec<u8>, token: ConcurrencyToken) -> Self {
        Self {
            id: Some(id.into()),
            payload,
            token: Some(token),
            mode: WriteMode::Index,
            refresh: RefreshPolicy::None,
        }
    }

    /// Sets the write mode.
    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the token.
    pub fn with_token(mut self, token: Option<ConcurrencyToken>) -> Self {
        self.token = token;
        self
    }

    /// Sets the refresh policy.
    pub fn with_refresh(mut self, refresh: RefreshPolicy) -> Self {
        self.refresh = refresh;
        self
    }
}

/// Acknowledgement of a single-document write or delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAck {
    /// Document id (server assigned for id-less creates).
    pub id: String,
    /// Version after the write.
    pub token: ConcurrencyToken,
    /// `created`, `updated`, `deleted`.
    pub result: String,
}

/// A document transport carries requests to a store.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, in-process, mock for testing, etc.).
pub trait DocumentTransport: Send + Sync {
    /// Sends a bulk request; returns one response per action, in order.
    fn bulk_write(
        &self,
        index: &str,
        actions: &[BulkAction],
        refresh: RefreshPolicy,
    ) -> ClientResult<Vec<BulkItemResponse>>;

    /// Reads a document; `None` if it does not exist.
    fn get(&self, index: &str, id: &str) -> ClientResult<Option<VersionedDocument>>;

    /// Writes a single document.
    fn write(&self, index: &str, request: &WriteRequest) -> ClientResult<WriteAck>;

    /// Deletes a single document.
    fn delete(
        &self,
        index: &str,
        id: &str,
        token: Option<ConcurrencyToken>,
        refresh: RefreshPolicy,
    ) -> ClientResult<WriteAck>;

    /// Runs a search. With `scroll` set, the page carries a cursor handle.
    fn search(
        &self,
        index: &str,
        request: &SearchRequest,
        scroll: Option<Duration>,
    ) -> ClientResult<SearchPage>;

    /// Fetches the next page of a scroll, extending its lease by `ttl`.
    fn advance_cursor(&self, scroll_id: &str, ttl: Duration) -> ClientResult<SearchPage>;

    /// Releases a scroll cursor.
    fn release_cursor(&self, scroll_id: &str) -> ClientResult<()>;

    /// Counts matching documents.
    fn count(&self, index: &str, query: Option<&serde_json::Value>) -> ClientResult<u64>;

    /// Makes all previous writes visible to searches.
    fn refresh(&self, index: &str) -> ClientResult<()>;
}

impl<X: DocumentTransport + ?Sized> DocumentTransport for Arc<X> {
    fn bulk_write(
        &self,
        index: &str,
        actions: &[BulkAction],
        refresh: RefreshPolicy,
    ) -> ClientResult<Vec<BulkItemResponse>> {
        (**self).bulk_write(index, actions, refresh)
    }

    fn get(&self, index: &str, id: &str) -> ClientResult<Option<VersionedDocument>> {
        (**self).get(index, id)
    }

    fn write(&self, index: &str, request: &WriteRequest) -> ClientResult<WriteAck> {
        (**self).write(index, request)
    }

    fn delete(
        &self,
        index: &str,
        id: &str,
        token: Option<ConcurrencyToken>,
        refresh: RefreshPolicy,
    ) -> ClientResult<WriteAck> {
        (**self).delete(index, id, token, refresh)
    }

    fn search(
        &self,
        index: &str,
        request: &SearchRequest,
        scroll: Option<Duration>,
    ) -> ClientResult<SearchPage> {
        (**self).search(index, request, scroll)
    }

    fn advance_cursor(&self, scroll_id: &str, ttl: Duration) -> ClientResult<SearchPage> {
        (**self).advance_cursor(scroll_id, ttl)
    }

    fn release_cursor(&self, scroll_id: &str) -> ClientResult<()> {
        (**self).release_cursor(scroll_id)
    }

    fn count(&self, index: &str, query: Option<&serde_json::Value>) -> ClientResult<u64> {
        (**self).count(index, query)
    }

    fn refresh(&self, index: &str) -> ClientResult<()> {
        (**self).refresh(index)
    }
}

/// An in-memory transport for tests.
///
/// Documents live in a map with versions; bulk batches, writes and cursor
/// calls are recorded. Conflicts and search pages can be scripted.
#[derive(Debug, Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

#[derive(Debug, Default)]
struct MockState {
    documents: HashMap<String, VersionedDocument>,
    sequence: u64,
    bulk_calls: Vec<Vec<BulkAction>>,
    bulk_failures: VecDeque<String>,
    forced_conflicts: u32,
    writes: u32,
    pages: VecDeque<SearchPage>,
    advances: Vec<String>,
    releases: Vec<String>,
    refreshes: u32,
}

impl MockState {
    fn next_token(&mut self) -> ConcurrencyToken {
        self.sequence += 1;
        ConcurrencyToken::new(1, self.sequence)
    }

    fn store(&mut self, id: &str, source: Vec<u8>) -> ConcurrencyToken {
        let token = self.next_token();
        self.documents.insert(
            id.to_string(),
            VersionedDocument {
                id: id.to_string(),
                token,
                source,
            },
        );
        token
    }

    fn check_token(&self, id: &str, token: Option<ConcurrencyToken>) -> Result<(), String> {
        let Some(token) = token else {
            return Ok(());
        };
        match self.documents.get(id) {
            Some(doc) if doc.token == token => Ok(()),
            Some(doc) => Err(format!("expected {token}, current {}", doc.token)),
            None => Err(format!("expected {token}, document missing")),
        }
    }

    fn apply(&mut self, action: &BulkAction) -> ItemResult {
        let id = action
            .id
            .clone()
            .unwrap_or_else(|| format!("auto-{}", self.sequence + 1));
        let mut result = ItemResult {
            index: None,
            id: Some(id.clone()),
            status: 200,
            seq_no: None,
            primary_term: None,
            result: None,
            error: None,
        };
        let rejected = match action.op_type {
            OpType::Create if self.documents.contains_key(&id) => {
                Some((409, "document already exists".to_string()))
            }
            _ if action.token.is_some() && self.forced_conflicts > 0 => {
                self.forced_conflicts -= 1;
                Some((409, "forced conflict".to_string()))
            }
            OpType::Delete if !self.documents.contains_key(&id) => {
                Some((404, "not found".to_string()))
            }
            _ => self.check_token(&id, action.token).err().map(|m| (409, m)),
        };
        if let Some((status, reason)) = rejected {
            result.status = status;
            result.error = Some(docbulk_protocol::ErrorCause::new("mock_exception", reason));
            return result;
        }
        let token = match action.op_type {
            OpType::Delete => {
                self.documents.remove(&id);
                result.result = Some("deleted".into());
                self.next_token()
            }
            _ => {
                let existed = self.documents.contains_key(&id);
                result.status = if existed { 200 } else { 201 };
                result.result = Some(if existed { "updated" } else { "created" }.into());
                self.store(&id, action.source.clone().unwrap_or_default())
            }
        };
        result.seq_no = Some(token.sequence);
        result.primary_term = Some(token.epoch);
        result
    }
}

impl MockTransport {
    /// Creates an empty mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a document and returns its version.
    pub fn put_document(&self, id: &str, source: &[u8]) -> ConcurrencyToken {
        self.state.lock().store(id, source.to_vec())
    }

    /// Returns a stored document.
    pub fn document(&self, id: &str) -> Option<VersionedDocument> {
        self.state.lock().documents.get(id).cloned()
    }

    /// Makes the next `n` conditional writes fail with a conflict.
    pub fn force_conflicts(&self, n: u32) {
        self.state.lock().forced_conflicts = n;
    }

    /// Makes the next bulk request fail at the transport level.
    pub fn fail_next_bulk(&self, message: impl Into<String>) {
        self.state.lock().bulk_failures.push_back(message.into());
    }

    /// Queues a search page. `search` returns the first, advances the rest.
    pub fn push_page(&self, page: SearchPage) {
        self.state.lock().pages.push_back(page);
    }

    /// Returns the actions of every bulk request, in order.
    pub fn bulk_calls(&self) -> Vec<Vec<BulkAction>> {
        self.state.lock().bulk_calls.clone()
    }

    /// Returns the sizes of every bulk request, in order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.state.lock().bulk_calls.iter().map(Vec::len).collect()
    }

    /// Returns the number of single-document writes.
    pub fn writes(&self) -> u32 {
        self.state.lock().writes
    }

    /// Returns the handles passed to `advance_cursor`.
    pub fn advances(&self) -> Vec<String> {
        self.state.lock().advances.clone()
    }

    /// Returns the handles passed to `release_cursor`.
    pub fn releases(&self) -> Vec<String> {
        self.state.lock().releases.clone()
    }

    /// Returns the number of refresh calls.
    pub fn refreshes(&self) -> u32 {
        self.state.lock().refreshes
    }
}

impl DocumentTransport for MockTransport {
    fn bulk_write(
        &self,
        _index: &str,
        actions: &[BulkAction],
        _refresh: RefreshPolicy,
    ) -> ClientResult<Vec<BulkItemResponse>> {
        let mut state = self.state.lock();
        state.bulk_calls.push(actions.to_vec());
        if let Some(message) = state.bulk_failures.pop_front() {
            return Err(ClientError::transport_retryable(message));
        }
        Ok(actions
            .iter()
            .map(|action| BulkItemResponse::new(action.op_type, state.apply(action)))
            .collect())
    }

    fn get(&self, _index: &str, id: &str) -> ClientResult<Option<VersionedDocument>> {
        Ok(self.state.lock().documents.get(id).cloned())
    }

    fn write(&self, _index: &str, request: &WriteRequest) -> ClientResult<WriteAck> {
        let mut state = self.state.lock();
        state.writes += 1;
        let id = match &request.id {
            Some(id) => id.clone(),
            None => format!("auto-{}", state.sequence + 1),
        };
        if request.token.is_some() && state.forced_conflicts > 0 {
            state.forced_conflicts -= 1;
            return Err(ClientError::Conflict {
                id,
                message: "forced conflict".into(),
            });
        }
        if request.mode == WriteMode::Create && state.documents.contains_key(&id) {
            return Err(ClientError::Conflict {
                id,
                message: "document already exists".into(),
            });
        }
        state
            .check_token(&id, request.token)
            .map_err(|message| ClientError::Conflict {
                id: id.clone(),
                message,
            })?;
        let existed = state.documents.contains_key(&id);
        let token = state.store(&id, request.payload.clone());
        Ok(WriteAck {
            id,
            token,
            result: if existed { "updated" } else { "created" }.into(),
        })
    }

    fn delete(
        &self,
        _index: &str,
        id: &str,
        token: Option<ConcurrencyToken>,
        _refresh: RefreshPolicy,
    ) -> ClientResult<WriteAck> {
        let mut state = self.state.lock();
        if !state.documents.contains_key(id) {
            return Err(ClientError::NotFound { id: id.to_string() });
        }
        state
            .check_token(id, token)
            .map_err(|message| ClientError::Conflict {
                id: id.to_string(),
                message,
            })?;
        state.documents.remove(id);
        let token = state.next_token();
        Ok(WriteAck {
            id: id.to_string(),
            token,
            result: "deleted".into(),
        })
    }

    fn search(
        &self,
        _index: &str,
        _request: &SearchRequest,
        _scroll: Option<Duration>,
    ) -> ClientResult<SearchPage> {
        Ok(self.state.lock().pages.pop_front().unwrap_or(SearchPage {
            hits: Vec::new(),
            total: TotalHits::exact(0),
            scroll_id: None,
        }))
    }

    fn advance_cursor(&self, scroll_id: &str, _ttl: Duration) -> ClientResult<SearchPage> {
        let mut state = self.state.lock();
        state.advances.push(scroll_id.to_string());
        let total = TotalHits::exact(0);
        Ok(state.pages.pop_front().unwrap_or(SearchPage {
            hits: Vec::new(),
            total,
            scroll_id: Some(scroll_id.to_string()),
        }))
    }

    fn release_cursor(&self, scroll_id: &str) -> ClientResult<()> {
        self.state.lock().releases.push(scroll_id.to_string());
        Ok(())
    }

    fn count(&self, _index: &str, _query: Option<&serde_json::Value>) -> ClientResult<u64> {
        Ok(self.state.lock().documents.len() as u64)
    }

    fn refresh(&self, _index: &str) -> ClientResult<()> {
        self.state.lock().refreshes += 1;
        Ok(())
    }
}
