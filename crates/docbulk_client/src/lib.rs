//! # docbulk Client
//!
//! Bulk writes, conflict-retrying updates and scrolling searches against an
//! Elasticsearch-style document store.
//!
//! This crate provides:
//! - `BulkSession` / `AsyncBulkSession`: buffered bulk writes with
//!   threshold flushes and per-item outcome routing
//! - `UpdateCoordinator`: read-transform-write with optimistic concurrency
//!   and bounded, randomized conflict retries
//! - `ScrollCursor` / `AsyncScrollCursor`: forward-only iteration over
//!   every page of a search, releasing the server cursor when done
//! - `Repository` / `AsyncRepository`: typed single-document operations
//! - `HttpTransport` over a pluggable `HttpClient`
//!
//! ## Key Invariants
//!
//! - Every accepted bulk item lands in exactly one batch
//! - `succeeded + failed == items` for every flushed batch
//! - An always-conflicting update performs exactly `max_attempts` writes
//! - A drained cursor releases its handle exactly once

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod async_session;
mod async_transport;
mod buffer;
mod codec;
mod config;
mod error;
mod http;
mod intent;
mod report;
mod repository;
mod scroll;
mod session;
mod transport;
mod update;

pub use async_session::{AsyncBulkProducer, AsyncBulkSession};
pub use async_transport::{AsyncDocumentTransport, BlockingTransport};
pub use buffer::{BatchBuffer, BatchSnapshot, BufferSealed};
pub use codec::{DocumentCodec, JsonCodec};
pub use config::{
    BulkConfig, HttpConfig, ReportCallback, RepositoryConfig, RetryConfig, SearchOptions,
    DEFAULT_SCROLL_TTL,
};
pub use error::{ClientError, ClientResult};
pub use http::{HttpClient, HttpResponse, HttpTransport, LoopbackClient, LoopbackServer, Method};
pub use intent::{BulkItem, ItemCallback, Transform, WriteIntent};
pub use report::{BatchOutcome, BulkStats, IntentKind, ItemReport, ItemStatus};
pub use repository::{AsyncRepository, Repository, Versioned};
pub use scroll::{AsyncScrollCursor, ScrollCursor, SearchResults};
pub use session::BulkSession;
pub use transport::{
    DocumentTransport, MockTransport, VersionedDocument, WriteAck, WriteMode, WriteRequest,
};
pub use update::{update_async, RetryDecision, RetryState, UpdateCoordinator, UpdateOutcome};

pub use docbulk_protocol::{
    ConcurrencyToken, FailureCategory, RefreshPolicy, SearchHit, TotalHits, TotalRelation,
};
