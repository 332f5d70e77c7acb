//! # docbulk Store
//!
//! Reference in-memory document store for docbulk.
//!
//! This crate provides:
//! - Versioned documents with conditional writes and conflict detection
//! - Refresh-gated search visibility
//! - Scroll contexts with TTL leases and explicit release
//! - An HTTP-shaped request router (`DocumentServer`)
//!
//! # Architecture
//!
//! Every index keeps two views of its documents: the live map that gets,
//! writes and deletes see, and a searchable snapshot that only changes on
//! refresh. Searches and counts read the snapshot, so a write made with
//! `refresh=false` is readable by id immediately but stays invisible to
//! searches until the next refresh.
//!
//! Every successful write takes the next sequence number of its index;
//! failed writes do not consume one. The primary term is fixed per store.
//!
//! ```
//! use docbulk_store::{DocumentServer, StoreConfig};
//!
//! let server = DocumentServer::new(StoreConfig::default());
//! let reply = server.handle("PUT", "/things/_doc/1?refresh=true", br#"{"title":"hi"}"#);
//! assert_eq!(reply.status, 201);
//!
//! let reply = server.handle("GET", "/things/_doc/1", b"");
//! assert_eq!(reply.status, 200);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod documents;
mod error;
mod query;
mod scroll;
mod server;

pub use config::StoreConfig;
pub use documents::{DocumentStore, StoredDocument, WriteOp};
pub use error::{StoreError, StoreResult};
pub use query::Query;
pub use scroll::ScrollRegistry;
pub use server::{DocumentServer, StoreReply};
