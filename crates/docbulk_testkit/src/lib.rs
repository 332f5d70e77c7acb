//! # docbulk Testkit
//!
//! Test utilities for docbulk.
//!
//! This crate provides:
//! - Fixtures wiring the client to an in-process reference store
//! - Transport wrappers that count calls or inject conflicts and failures
//! - Property-based test generators using proptest
//! - Concurrent producer stress helpers
//! - Tracing initialisation for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use docbulk_testkit::prelude::*;
//!
//! #[test]
//! fn writes_land_in_the_store() {
//!     with_store(|store| {
//!         let notes = store.repository::<Note>("notes");
//!         notes.index(Some("1"), &Note::new("hi")).unwrap();
//!         assert_eq!(notes.get("1").unwrap(), Some(Note::new("hi")));
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;
pub mod transports;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
    pub use crate::transports::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
pub use transports::*;
