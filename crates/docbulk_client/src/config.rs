//! Configuration for repositories, bulk sessions and searches.

use crate::report::ItemReport;
use docbulk_protocol::RefreshPolicy;
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default scroll lease, re-sent with every advance.
pub const DEFAULT_SCROLL_TTL: Duration = Duration::from_secs(60);

/// Configuration for conflict retries of conditional updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of conditional writes per update. Zero behaves as one.
    pub max_attempts: u32,
    /// Lower bound of the random delay between attempts.
    pub min_backoff: Duration,
    /// Upper bound of the random delay between attempts.
    pub max_backoff: Duration,
}

impl RetryConfig {
    /// Creates a retry configuration with the default backoff window.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            min_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(500),
        }
    }

    /// Creates a configuration that writes once and never retries.
    pub fn no_retry() -> Self {
        Self::new(1).with_backoff(Duration::ZERO, Duration::ZERO)
    }

    /// Sets the maximum number of attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the backoff window. Bounds are swapped if given in reverse.
    pub fn with_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.min_backoff = min.min(max);
        self.max_backoff = min.max(max);
        self
    }

    /// Returns the effective attempt budget (at least one).
    pub fn effective_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Draws a delay uniformly from `[min_backoff, max_backoff]`.
    pub fn backoff(&self) -> Duration {
        if self.max_backoff <= self.min_backoff {
            return self.min_backoff;
        }
        // Windows beyond u64 nanoseconds saturate; the clamp keeps the draw inside.
        let min = u64::try_from(self.min_backoff.as_nanos()).unwrap_or(u64::MAX);
        let max = u64::try_from(self.max_backoff.as_nanos()).unwrap_or(u64::MAX);
        Duration::from_nanos(rand::thread_rng().gen_range(min..=max))
            .clamp(self.min_backoff, self.max_backoff)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(2)
    }
}

/// Callback invoked with the report of every dispatched item.
pub type ReportCallback = Arc<dyn Fn(&ItemReport) + Send + Sync>;

/// Configuration for a bulk session.
#[derive(Clone)]
pub struct BulkConfig {
    /// Number of pending items that triggers a flush.
    pub batch_size: usize,
    /// Attempt budget for re-running conflicting updates; 0 disables it.
    pub retry_conflicting_updates: u32,
    /// Refresh policy sent with every batch.
    pub refresh: RefreshPolicy,
    /// Session-wide report callback, invoked after per-item callbacks.
    pub item_callback: Option<ReportCallback>,
}

impl BulkConfig {
    /// Creates a configuration with the given batch size.
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            retry_conflicting_updates: 0,
            refresh: RefreshPolicy::WaitFor,
            item_callback: None,
        }
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Enables conflict retries with the given attempt budget.
    pub fn with_retry_conflicting_updates(mut self, attempts: u32) -> Self {
        self.retry_conflicting_updates = attempts;
        self
    }

    /// Sets the refresh policy for batches.
    pub fn with_refresh(mut self, refresh: RefreshPolicy) -> Self {
        self.refresh = refresh;
        self
    }

    /// Installs a session-wide report callback.
    pub fn with_item_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ItemReport) + Send + Sync + 'static,
    {
        self.item_callback = Some(Arc::new(callback));
        self
    }

    /// Returns the batch size, at least one.
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self::new(100)
    }
}

impl fmt::Debug for BulkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkConfig")
            .field("batch_size", &self.batch_size)
            .field("retry_conflicting_updates", &self.retry_conflicting_updates)
            .field("refresh", &self.refresh)
            .field("item_callback", &self.item_callback.is_some())
            .finish()
    }
}

/// Configuration for a repository bound to one index.
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Index name.
    pub index: String,
    /// Alias used for reads and searches.
    pub read_alias: Option<String>,
    /// Alias used for writes.
    pub write_alias: Option<String>,
    /// Whether explicit `refresh` calls are permitted.
    pub refresh_allowed: bool,
    /// Retry configuration for updates.
    pub retry: RetryConfig,
    /// Refresh policy for single-document writes.
    pub refresh: RefreshPolicy,
}

impl RepositoryConfig {
    /// Creates a configuration for the given index.
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            read_alias: None,
            write_alias: None,
            refresh_allowed: false,
            retry: RetryConfig::default(),
            refresh: RefreshPolicy::None,
        }
    }

    /// Sets the read alias.
    pub fn with_read_alias(mut self, alias: impl Into<String>) -> Self {
        self.read_alias = Some(alias.into());
        self
    }

    /// Sets the write alias.
    pub fn with_write_alias(mut self, alias: impl Into<String>) -> Self {
        self.write_alias = Some(alias.into());
        self
    }

    /// Permits explicit refresh calls.
    pub fn with_refresh_allowed(mut self, allowed: bool) -> Self {
        self.refresh_allowed = allowed;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the refresh policy for single-document writes.
    pub fn with_refresh(mut self, refresh: RefreshPolicy) -> Self {
        self.refresh = refresh;
        self
    }

    /// Returns the name reads go to.
    pub fn read_target(&self) -> &str {
        self.read_alias.as_deref().unwrap_or(&self.index)
    }

    /// Returns the name writes go to.
    pub fn write_target(&self) -> &str {
        self.write_alias.as_deref().unwrap_or(&self.index)
    }
}

/// Options for a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOptions {
    /// Hits per page.
    pub page_size: u32,
    /// Scroll lease; `None` fetches a single page.
    pub scroll: Option<Duration>,
}

impl SearchOptions {
    /// A scrolling search with the default lease.
    pub fn scrolling(page_size: u32) -> Self {
        Self {
            page_size,
            scroll: Some(DEFAULT_SCROLL_TTL),
        }
    }

    /// A single-page search.
    pub fn single_page(page_size: u32) -> Self {
        Self {
            page_size,
            scroll: None,
        }
    }

    /// Sets the scroll lease.
    pub fn with_scroll_ttl(mut self, ttl: Duration) -> Self {
        self.scroll = Some(ttl);
        self
    }
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self::scrolling(100)
    }
}

/// Configuration for the HTTP transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    /// Base URL of the store, e.g. `http://localhost:9200`.
    pub base_url: String,
    /// Request timeout handed to the HTTP client.
    pub timeout: Duration,
}

impl HttpConfig {
    /// Creates a configuration for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
