//! Store configuration.

use std::time::Duration;

/// Configuration for the document store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum number of actions accepted in one bulk request.
    pub max_bulk_actions: usize,
    /// Maximum page size of a search.
    pub max_page_size: u32,
    /// Longest scroll lease a client may request.
    pub max_scroll_ttl: Duration,
    /// Primary term stamped on every write.
    pub primary_term: u64,
}

impl StoreConfig {
    /// Creates a new store configuration with default limits.
    pub fn new() -> Self {
        Self {
            max_bulk_actions: 10_000,
            max_page_size: 10_000,
            max_scroll_ttl: Duration::from_secs(24 * 3600),
            primary_term: 1,
        }
    }

    /// Sets the maximum bulk request size.
    pub fn with_max_bulk_actions(mut self, max: usize) -> Self {
        self.max_bulk_actions = max;
        self
    }

    /// Sets the maximum search page size.
    pub fn with_max_page_size(mut self, max: u32) -> Self {
        self.max_page_size = max;
        self
    }

    /// Sets the longest accepted scroll lease.
    pub fn with_max_scroll_ttl(mut self, ttl: Duration) -> Self {
        self.max_scroll_ttl = ttl;
        self
    }

    /// Sets the primary term.
    pub fn with_primary_term(mut self, term: u64) -> Self {
        self.primary_term = term;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new()
    }
}
