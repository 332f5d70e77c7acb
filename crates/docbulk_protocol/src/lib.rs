//! # docbulk Protocol
//!
//! Wire types and JSON codecs spoken between the docbulk client and a
//! document store.
//!
//! This crate provides:
//! - `ConcurrencyToken` for optimistic concurrency control
//! - `BulkAction` and the NDJSON bulk body codec
//! - Per-item bulk responses and failure categories
//! - Get, write, search, scroll and count messages
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod messages;
mod operation;
mod token;

pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    format_ttl, parse_ttl, BulkItemResponse, BulkResponse, ClearScrollRequest,
    ClearScrollResponse, CountRequest, CountResponse, ErrorCause, ErrorResponse, FailureCategory,
    GetResponse, HitsEnvelope, ItemResult, RawHit, ScrollRequest, SearchHit, SearchPage,
    SearchRequest, SearchResponse, TotalHits, TotalRelation, WriteResponse,
};
pub use operation::{decode_bulk_body, encode_bulk_body, BulkAction, OpType, RefreshPolicy};
pub use token::ConcurrencyToken;
