//! Versioned document storage.

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::query::Query;
use docbulk_protocol::{
    BulkAction, BulkItemResponse, BulkResponse, ConcurrencyToken, GetResponse, ItemResult, OpType,
    RawHit, RefreshPolicy, WriteResponse,
};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// A stored document together with its version.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    /// Document id.
    pub id: String,
    /// Sequence number of the write that produced this version.
    pub seq_no: u64,
    /// Primary term of that write.
    pub primary_term: u64,
    /// Document body.
    pub source: Value,
}

impl StoredDocument {
    /// Returns the version of this document.
    pub fn token(&self) -> ConcurrencyToken {
        ConcurrencyToken::new(self.primary_term, self.seq_no)
    }

    fn to_hit(&self, index: &str, with_version: bool) -> RawHit {
        RawHit {
            index: index.to_string(),
            id: self.id.clone(),
            seq_no: with_version.then_some(self.seq_no),
            primary_term: with_version.then_some(self.primary_term),
            source: Some(self.source.clone()),
        }
    }
}

/// Result of an applied write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOp {
    /// Document id.
    pub id: String,
    /// Sequence number assigned to the write.
    pub seq_no: u64,
    /// Primary term of the write.
    pub primary_term: u64,
    /// `created`, `updated` or `deleted`.
    pub result: &'static str,
    /// HTTP status of the write.
    pub status: u16,
}

impl WriteOp {
    fn to_response(&self, index: &str) -> WriteResponse {
        WriteResponse {
            index: index.to_string(),
            id: self.id.clone(),
            result: self.result.to_string(),
            seq_no: self.seq_no,
            primary_term: self.primary_term,
        }
    }

    fn to_item(&self, index: &str) -> ItemResult {
        ItemResult {
            index: Some(index.to_string()),
            id: Some(self.id.clone()),
            status: self.status,
            seq_no: Some(self.seq_no),
            primary_term: Some(self.primary_term),
            result: Some(self.result.to_string()),
            error: None,
        }
    }
}

fn failed_item(index: Option<&str>, id: Option<String>, err: &StoreError) -> ItemResult {
    let (result, error) = match err {
        StoreError::DocumentMissing { .. } => (Some("not_found".to_string()), None),
        other => (None, Some(other.to_cause())),
    };
    ItemResult {
        index: index.map(str::to_string),
        id,
        status: err.status(),
        seq_no: None,
        primary_term: None,
        result,
        error,
    }
}

/// One index: live documents plus the snapshot searches see.
#[derive(Debug, Default)]
struct IndexState {
    live: BTreeMap<String, StoredDocument>,
    searchable: BTreeMap<String, StoredDocument>,
    next_seq_no: u64,
    dirty: bool,
}

impl IndexState {
    fn check_token(
        &self,
        id: &str,
        token: Option<ConcurrencyToken>,
    ) -> StoreResult<Option<&StoredDocument>> {
        let current = self.live.get(id);
        match (token, current) {
            (None, _) => Ok(current),
            (Some(required), None) => Err(StoreError::conflict(
                id,
                format!(
                    "required seqNo [{}], primary term [{}] but no document was found",
                    required.sequence, required.epoch
                ),
            )),
            (Some(required), Some(doc)) if doc.token() != required => Err(StoreError::conflict(
                id,
                format!(
                    "required seqNo [{}], primary term [{}]. current document has seqNo [{}] and primary term [{}]",
                    required.sequence, required.epoch, doc.seq_no, doc.primary_term
                ),
            )),
            (Some(_), Some(doc)) => Ok(Some(doc)),
        }
    }

    fn take_seq_no(&mut self) -> u64 {
        let seq_no = self.next_seq_no;
        self.next_seq_no += 1;
        self.dirty = true;
        seq_no
    }

    fn put(
        &mut self,
        op_type: OpType,
        id: String,
        token: Option<ConcurrencyToken>,
        source: Value,
        primary_term: u64,
    ) -> StoreResult<WriteOp> {
        if op_type == OpType::Create && token.is_some() {
            return Err(StoreError::InvalidRequest(
                "create operations do not support compare and set".into(),
            ));
        }
        let existing = self.check_token(&id, token)?.map(|doc| doc.seq_no);
        if let (OpType::Create, Some(seq_no)) = (op_type, existing) {
            return Err(StoreError::conflict(
                &id,
                format!("document already exists (current seqNo [{seq_no}])"),
            ));
        }

        let seq_no = self.take_seq_no();
        let (result, status) = match existing {
            Some(_) => ("updated", 200),
            None => ("created", 201),
        };
        self.live.insert(
            id.clone(),
            StoredDocument {
                id: id.clone(),
                seq_no,
                primary_term,
                source,
            },
        );
        Ok(WriteOp {
            id,
            seq_no,
            primary_term,
            result,
            status,
        })
    }

    fn remove(
        &mut self,
        id: String,
        token: Option<ConcurrencyToken>,
        primary_term: u64,
    ) -> StoreResult<WriteOp> {
        if self.check_token(&id, token)?.is_none() {
            return Err(StoreError::DocumentMissing { id });
        }
        let seq_no = self.take_seq_no();
        self.live.remove(&id);
        Ok(WriteOp {
            id,
            seq_no,
            primary_term,
            result: "deleted",
            status: 200,
        })
    }

    fn refresh(&mut self) {
        if self.dirty {
            self.searchable = self.live.clone();
            self.dirty = false;
        }
    }
}

fn parse_source(source: &[u8]) -> StoreResult<Value> {
    match serde_json::from_slice::<Value>(source)? {
        object @ Value::Object(_) => Ok(object),
        other => Err(StoreError::InvalidRequest(format!(
            "document source must be an object, got {other}"
        ))),
    }
}

fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// In-memory document store.
///
/// Indices are created on first write. Gets see every applied write;
/// searches and counts only see what the last refresh published.
pub struct DocumentStore {
    config: StoreConfig,
    indices: RwLock<HashMap<String, IndexState>>,
}

impl DocumentStore {
    /// Creates an empty store.
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            indices: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Creates an index if it does not exist.
    pub fn create_index(&self, index: &str) {
        self.indices.write().entry(index.to_string()).or_default();
    }

    /// Returns true if the index exists.
    pub fn index_exists(&self, index: &str) -> bool {
        self.indices.read().contains_key(index)
    }

    /// Returns the number of live documents in an index (0 if missing).
    pub fn doc_count(&self, index: &str) -> usize {
        self.indices.read().get(index).map_or(0, |s| s.live.len())
    }

    /// Applies a bulk request.
    ///
    /// Items are applied in order and never abort each other; the response
    /// carries one entry per action. `default_index` is used for actions
    /// that do not name an index.
    pub fn bulk(
        &self,
        default_index: Option<&str>,
        actions: Vec<BulkAction>,
        refresh: RefreshPolicy,
    ) -> StoreResult<BulkResponse> {
        if actions.len() > self.config.max_bulk_actions {
            return Err(StoreError::InvalidRequest(format!(
                "bulk request has {} actions, limit is {}",
                actions.len(),
                self.config.max_bulk_actions
            )));
        }

        let started = Instant::now();
        let primary_term = self.config.primary_term;
        let mut indices = self.indices.write();
        let mut touched = BTreeSet::new();
        let mut items = Vec::with_capacity(actions.len());

        for action in actions {
            let op_type = action.op_type;
            let Some(index) = action.index.as_deref().or(default_index).map(str::to_string) else {
                let err = StoreError::InvalidRequest("action does not name an index".into());
                items.push(BulkItemResponse::new(op_type, failed_item(None, action.id, &err)));
                continue;
            };

            let id = match (op_type, action.id) {
                (_, Some(id)) => id,
                (OpType::Create, None) => generate_id(),
                (_, None) => {
                    let err = StoreError::InvalidRequest("action requires an _id".into());
                    items.push(BulkItemResponse::new(op_type, failed_item(Some(&index), None, &err)));
                    continue;
                }
            };

            let state = indices.entry(index.clone()).or_default();
            let applied = match op_type {
                OpType::Delete => state.remove(id.clone(), action.token, primary_term),
                OpType::Create | OpType::Index => action
                    .source
                    .as_deref()
                    .ok_or_else(|| StoreError::InvalidRequest("action is missing its source".into()))
                    .and_then(parse_source)
                    .and_then(|source| state.put(op_type, id.clone(), action.token, source, primary_term)),
            };

            let item = match applied {
                Ok(op) => {
                    touched.insert(index.clone());
                    op.to_item(&index)
                }
                Err(err) => failed_item(Some(&index), Some(id), &err),
            };
            items.push(BulkItemResponse::new(op_type, item));
        }

        if refresh.makes_visible() {
            for name in &touched {
                if let Some(state) = indices.get_mut(name) {
                    state.refresh();
                }
            }
        }
        drop(indices);

        let response = BulkResponse::new(started.elapsed().as_millis() as u64, items);
        debug!(
            items = response.items.len(),
            errors = response.errors,
            refresh = refresh.as_param(),
            "applied bulk request"
        );
        Ok(response)
    }

    /// Reads a document by id, seeing every applied write.
    pub fn get(&self, index: &str, id: &str) -> StoreResult<GetResponse> {
        let indices = self.indices.read();
        let state = indices
            .get(index)
            .ok_or_else(|| StoreError::IndexNotFound(index.to_string()))?;
        let response = match state.live.get(id) {
            Some(doc) => GetResponse {
                index: index.to_string(),
                id: id.to_string(),
                found: true,
                seq_no: Some(doc.seq_no),
                primary_term: Some(doc.primary_term),
                source: Some(doc.source.clone()),
            },
            None => GetResponse {
                index: index.to_string(),
                id: id.to_string(),
                found: false,
                seq_no: None,
                primary_term: None,
                source: None,
            },
        };
        Ok(response)
    }

    /// Writes a single document.
    ///
    /// A missing `id` is only accepted for creates and gets a generated id.
    pub fn write(
        &self,
        index: &str,
        id: Option<String>,
        op_type: OpType,
        token: Option<ConcurrencyToken>,
        source: &[u8],
        refresh: RefreshPolicy,
    ) -> StoreResult<(u16, WriteResponse)> {
        let id = match (op_type, id) {
            (OpType::Delete, _) => {
                return Err(StoreError::InvalidRequest(
                    "deletes are not writes".into(),
                ))
            }
            (_, Some(id)) => id,
            (OpType::Create, None) => generate_id(),
            (OpType::Index, None) => {
                return Err(StoreError::InvalidRequest("index requires an id".into()))
            }
        };
        let source = parse_source(source)?;

        let mut indices = self.indices.write();
        let state = indices.entry(index.to_string()).or_default();
        let op = state.put(op_type, id, token, source, self.config.primary_term)?;
        if refresh.makes_visible() {
            state.refresh();
        }
        Ok((op.status, op.to_response(index)))
    }

    /// Deletes a single document.
    pub fn delete(
        &self,
        index: &str,
        id: &str,
        token: Option<ConcurrencyToken>,
        refresh: RefreshPolicy,
    ) -> StoreResult<WriteResponse> {
        let mut indices = self.indices.write();
        let state = indices
            .get_mut(index)
            .ok_or_else(|| StoreError::IndexNotFound(index.to_string()))?;
        let op = state.remove(id.to_string(), token, self.config.primary_term)?;
        if refresh.makes_visible() {
            state.refresh();
        }
        Ok(op.to_response(index))
    }

    /// Returns the searchable documents matching a query, ordered by id.
    pub fn search(&self, index: &str, query: &Query, with_version: bool) -> StoreResult<Vec<RawHit>> {
        let indices = self.indices.read();
        let state = indices
            .get(index)
            .ok_or_else(|| StoreError::IndexNotFound(index.to_string()))?;
        Ok(state
            .searchable
            .values()
            .filter(|doc| query.matches(&doc.id, &doc.source))
            .map(|doc| doc.to_hit(index, with_version))
            .collect())
    }

    /// Counts the searchable documents matching a query.
    pub fn count(&self, index: &str, query: &Query) -> StoreResult<u64> {
        let indices = self.indices.read();
        let state = indices
            .get(index)
            .ok_or_else(|| StoreError::IndexNotFound(index.to_string()))?;
        Ok(state
            .searchable
            .values()
            .filter(|doc| query.matches(&doc.id, &doc.source))
            .count() as u64)
    }

    /// Publishes all applied writes of an index to searches.
    pub fn refresh(&self, index: &str) -> StoreResult<()> {
        let mut indices = self.indices.write();
        let state = indices
            .get_mut(index)
            .ok_or_else(|| StoreError::IndexNotFound(index.to_string()))?;
        state.refresh();
        Ok(())
    }
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}
