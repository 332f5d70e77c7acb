//! Bulk actions and the NDJSON bulk body.

use crate::error::{ProtocolError, ProtocolResult};
use crate::token::ConcurrencyToken;
use serde::{Deserialize, Serialize};

/// Controls when a write becomes visible to searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshPolicy {
    /// Do not refresh; the write shows up after the next periodic refresh.
    #[default]
    None,
    /// Return once the write is visible to searches.
    WaitFor,
    /// Force a refresh as part of the request.
    Immediate,
}

impl RefreshPolicy {
    /// Returns the `refresh` query parameter value.
    pub fn as_param(&self) -> &'static str {
        match self {
            RefreshPolicy::None => "false",
            RefreshPolicy::WaitFor => "wait_for",
            RefreshPolicy::Immediate => "true",
        }
    }

    /// Parses a `refresh` query parameter value.
    pub fn from_param(value: &str) -> ProtocolResult<Self> {
        match value {
            "" | "true" => Ok(RefreshPolicy::Immediate),
            "false" => Ok(RefreshPolicy::None),
            "wait_for" => Ok(RefreshPolicy::WaitFor),
            other => Err(ProtocolError::InvalidRefreshPolicy(other.to_string())),
        }
    }

    /// Returns true if the write must be visible when the request returns.
    pub fn makes_visible(&self) -> bool {
        !matches!(self, RefreshPolicy::None)
    }
}

/// Type of a bulk action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpType {
    /// Create a document; fails if the id already exists.
    Create,
    /// Create or replace a document.
    Index,
    /// Delete a document.
    Delete,
}

impl OpType {
    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            OpType::Create => "create",
            OpType::Index => "index",
            OpType::Delete => "delete",
        }
    }

    /// Returns true if the action line is followed by a source line.
    pub fn has_source(&self) -> bool {
        !matches!(self, OpType::Delete)
    }
}

/// One action of a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkAction {
    /// Action type.
    pub op_type: OpType,
    /// Target index; `None` uses the index from the request path.
    pub index: Option<String>,
    /// Document id; `None` lets the store assign one (create only).
    pub id: Option<String>,
    /// Required current version, if any.
    pub token: Option<ConcurrencyToken>,
    /// Document source as compact JSON (create and index only).
    pub source: Option<Vec<u8>>,
}

impl BulkAction {
    /// A create action.
    pub fn create(id: Option<String>, source: Vec<u8>) -> Self {
        Self {
            op_type: OpType::Create,
            index: None,
            id,
            token: None,
            source: Some(source),
        }
    }

    /// An unconditional index (upsert) action.
    pub fn index(id: impl Into<String>, source: Vec<u8>) -> Self {
        Self {
            op_type: OpType::Index,
            index: None,
            id: Some(id.into()),
            token: None,
            source: Some(source),
        }
    }

    /// An index action guarded by a concurrency token.
    pub fn conditional_index(id: impl Into<String>, token: ConcurrencyToken, source: Vec<u8>) -> Self {
        Self {
            op_type: OpType::Index,
            index: None,
            id: Some(id.into()),
            token: Some(token),
            source: Some(source),
        }
    }

    /// A delete action, optionally guarded by a token.
    pub fn delete(id: impl Into<String>, token: Option<ConcurrencyToken>) -> Self {
        Self {
            op_type: OpType::Delete,
            index: None,
            id: Some(id.into()),
            token,
            source: None,
        }
    }

    fn line(&self) -> ActionLine {
        let (if_seq_no, if_primary_term) = ConcurrencyToken::into_parts(self.token);
        let meta = ActionMeta {
            index: self.index.clone(),
            id: self.id.clone(),
            if_seq_no,
            if_primary_term,
        };
        match self.op_type {
            OpType::Create => ActionLine::Create(meta),
            OpType::Index => ActionLine::Index(meta),
            OpType::Delete => ActionLine::Delete(meta),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ActionMeta {
    #[serde(rename = "_index", default, skip_serializing_if = "Option::is_none")]
    index: Option<String>,
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    if_seq_no: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    if_primary_term: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ActionLine {
    Create(ActionMeta),
    Index(ActionMeta),
    Delete(ActionMeta),
}

/// Encodes actions as an NDJSON bulk body (action line, then source line
/// for create and index). Item order is preserved.
pub fn encode_bulk_body(actions: &[BulkAction]) -> ProtocolResult<Vec<u8>> {
    let mut out = Vec::new();
    for action in actions {
        serde_json::to_writer(&mut out, &action.line())?;
        out.push(b'\n');

        if action.op_type.has_source() {
            let source = action
                .source
                .as_ref()
                .ok_or(ProtocolError::MissingSource(action.op_type.as_str()))?;
            if source.contains(&b'\n') {
                // Pretty-printed sources would break the line framing.
                let value: serde_json::Value = serde_json::from_slice(source)?;
                serde_json::to_writer(&mut out, &value)?;
            } else {
                out.extend_from_slice(source);
            }
            out.push(b'\n');
        }
    }
    Ok(out)
}

/// Decodes an NDJSON bulk body. Blank lines are ignored.
pub fn decode_bulk_body(body: &[u8]) -> ProtocolResult<Vec<BulkAction>> {
    let mut actions = Vec::new();
    let mut lines = body
        .split(|b| *b == b'\n')
        .enumerate()
        .map(|(i, line)| (i + 1, line))
        .filter(|(_, line)| !line.iter().all(u8::is_ascii_whitespace));

    while let Some((line_no, line)) = lines.next() {
        let parsed: ActionLine = serde_json::from_slice(line)
            .map_err(|e| ProtocolError::invalid_bulk(line_no, e.to_string()))?;
        let (op_type, meta) = match parsed {
            ActionLine::Create(meta) => (OpType::Create, meta),
            ActionLine::Index(meta) => (OpType::Index, meta),
            ActionLine::Delete(meta) => (OpType::Delete, meta),
        };
        let token = ConcurrencyToken::from_parts(meta.if_seq_no, meta.if_primary_term)
            .map_err(|e| ProtocolError::invalid_bulk(line_no, e.to_string()))?;

        let source = if op_type.has_source() {
            let (source_no, source) = lines.next().ok_or_else(|| {
                ProtocolError::invalid_bulk(line_no, "action is missing its source line")
            })?;
            serde_json::from_slice::<serde::de::IgnoredAny>(source)
                .map_err(|e| ProtocolError::invalid_bulk(source_no, e.to_string()))?;
            Some(source.to_vec())
        } else {
            None
        };

        if op_type != OpType::Create && meta.id.is_none() {
            return Err(ProtocolError::invalid_bulk(
                line_no,
                format!("{} action requires an _id", op_type.as_str()),
            ));
        }

        actions.push(BulkAction {
            op_type,
            index: meta.index,
            id: meta.id,
            token,
            source,
        });
    }
    Ok(actions)
}
