//! Query parsing and matching.
//!
//! The store understands a small subset of the query DSL:
//!
//! | query | matches |
//! |---|---|
//! | absent, `{}` or `{"match_all":{}}` | every document |
//! | `{"match_none":{}}` | nothing |
//! | `{"term":{"field":value}}` | documents whose field equals `value` |
//! | `{"term":{"field":{"value":value}}}` | same as above |
//! | `{"ids":{"values":[..]}}` | documents with one of the ids |
//!
//! Field names may be dotted paths into nested objects. A term matches an
//! array field when any element equals the value.

use crate::error::{StoreError, StoreResult};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// A parsed query.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Matches every document.
    MatchAll,
    /// Matches nothing.
    MatchNone,
    /// Exact match on one field.
    Term {
        /// Dotted field path.
        field: String,
        /// Value to compare against.
        value: Value,
    },
    /// Matches the listed ids.
    Ids(HashSet<String>),
}

impl Query {
    /// Parses an optional query object.
    pub fn parse(query: Option<&Value>) -> StoreResult<Self> {
        let object = match query {
            None | Some(Value::Null) => return Ok(Query::MatchAll),
            Some(Value::Object(object)) => object,
            Some(other) => {
                return Err(StoreError::InvalidRequest(format!(
                    "query must be an object, got {other}"
                )))
            }
        };

        let mut clauses = object.iter();
        let (name, body) = match (clauses.next(), clauses.next()) {
            (None, _) => return Ok(Query::MatchAll),
            (Some(clause), None) => clause,
            (Some(_), Some(_)) => {
                return Err(StoreError::InvalidRequest(
                    "query must contain a single clause".into(),
                ))
            }
        };

        match name.as_str() {
            "match_all" => Ok(Query::MatchAll),
            "match_none" => Ok(Query::MatchNone),
            "term" => parse_term(body),
            "ids" => parse_ids(body),
            other => Err(StoreError::InvalidRequest(format!(
                "unsupported query type [{other}]"
            ))),
        }
    }

    /// Returns true if the document matches.
    pub fn matches(&self, id: &str, source: &Value) -> bool {
        match self {
            Query::MatchAll => true,
            Query::MatchNone => false,
            Query::Ids(ids) => ids.contains(id),
            Query::Term { field, value } => match lookup(source, field) {
                Some(Value::Array(items)) => items.iter().any(|item| item == value),
                Some(found) => found == value,
                None => false,
            },
        }
    }
}

fn single_entry<'a>(clause: &str, body: &'a Value) -> StoreResult<(&'a String, &'a Value)> {
    let object = body
        .as_object()
        .ok_or_else(|| StoreError::InvalidRequest(format!("[{clause}] query malformed")))?;
    let mut entries = object.iter();
    match (entries.next(), entries.next()) {
        (Some(entry), None) => Ok(entry),
        _ => Err(StoreError::InvalidRequest(format!(
            "[{clause}] query must name exactly one field"
        ))),
    }
}

fn parse_term(body: &Value) -> StoreResult<Query> {
    let (field, body) = single_entry("term", body)?;
    let value = match body {
        Value::Object(options) => long_form_value(options)?,
        Value::Array(_) => {
            return Err(StoreError::InvalidRequest(
                "[term] query does not support array values".into(),
            ))
        }
        scalar => scalar.clone(),
    };
    Ok(Query::Term {
        field: field.clone(),
        value,
    })
}

fn long_form_value(options: &Map<String, Value>) -> StoreResult<Value> {
    options
        .get("value")
        .cloned()
        .ok_or_else(|| StoreError::InvalidRequest("[term] query requires a value".into()))
}

fn parse_ids(body: &Value) -> StoreResult<Query> {
    let values = body
        .get("values")
        .and_then(Value::as_array)
        .ok_or_else(|| StoreError::InvalidRequest("[ids] query requires values".into()))?;
    let ids = values
        .iter()
        .map(|v| match v {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(StoreError::InvalidRequest(format!("invalid id {other}"))),
        })
        .collect::<StoreResult<HashSet<_>>>()?;
    Ok(Query::Ids(ids))
}

fn lookup<'a>(source: &'a Value, path: &str) -> Option<&'a Value> {
    if let Some(direct) = source.get(path) {
        return Some(direct);
    }
    path.split('.').try_fold(source, |node, part| node.get(part))
}
