//! Test fixtures and store helpers.
//!
//! Provides an in-process reference store reachable through the client's
//! real HTTP transport, plus a small document type for tests.

use docbulk_client::{
    AsyncRepository, BlockingTransport, HttpConfig, HttpResponse, HttpTransport, JsonCodec,
    LoopbackClient, LoopbackServer, Method, Repository, RepositoryConfig,
};
use docbulk_protocol::{encode_bulk_body, BulkAction};
use docbulk_store::{DocumentServer, StoreConfig};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Once};
use tracing_subscriber::EnvFilter;

/// Base URL used by loopback transports. Only the path reaches the store.
pub const LOOPBACK_URL: &str = "http://docbulk.test:9200";

/// Adapts a shared [`DocumentServer`] to the client's loopback seam.
#[derive(Clone)]
pub struct StoreLoopback(pub Arc<DocumentServer>);

impl LoopbackServer for StoreLoopback {
    fn handle(&self, method: Method, path: &str, body: &[u8]) -> HttpResponse {
        let reply = self.0.handle(method.as_str(), path, body);
        HttpResponse::new(reply.status, reply.body)
    }
}

/// HTTP transport talking to an in-process store.
pub type StoreTransport = HttpTransport<LoopbackClient<StoreLoopback>>;

/// Async transport talking to an in-process store.
pub type AsyncStoreTransport = BlockingTransport<StoreTransport>;

/// A reference store with helpers to build clients against it.
pub struct TestStore {
    server: Arc<DocumentServer>,
}

impl TestStore {
    /// Creates a store with default limits.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Creates a store with the given limits.
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            server: Arc::new(DocumentServer::new(config)),
        }
    }

    /// Returns the server.
    pub fn server(&self) -> &Arc<DocumentServer> {
        &self.server
    }

    /// Creates a new transport connected to this store.
    pub fn transport(&self) -> StoreTransport {
        HttpTransport::new(
            HttpConfig::new(LOOPBACK_URL),
            LoopbackClient::new(StoreLoopback(Arc::clone(&self.server))),
        )
    }

    /// Creates a repository over `index` that may refresh and makes its
    /// single-document writes visible immediately.
    pub fn repository<T>(&self, index: &str) -> Repository<T, StoreTransport>
    where
        T: Serialize + for<'de> Deserialize<'de>,
    {
        self.repository_with(test_repository_config(index))
    }

    /// Creates a repository with an explicit configuration.
    pub fn repository_with<T>(&self, config: RepositoryConfig) -> Repository<T, StoreTransport>
    where
        T: Serialize + for<'de> Deserialize<'de>,
    {
        Repository::new(self.transport(), JsonCodec::new(), config)
    }

    /// Creates an async repository over `index`.
    pub fn async_repository<T>(&self, index: &str) -> AsyncRepository<T, AsyncStoreTransport>
    where
        T: Serialize + for<'de> Deserialize<'de>,
    {
        AsyncRepository::new(
            Arc::new(BlockingTransport::new(self.transport())),
            Arc::new(JsonCodec::new()),
            test_repository_config(index),
        )
    }

    /// Indexes documents directly in the store and refreshes the index.
    pub fn seed<T, I>(&self, index: &str, documents: I)
    where
        T: Serialize,
        I: IntoIterator<Item = (String, T)>,
    {
        let actions: Vec<BulkAction> = documents
            .into_iter()
            .map(|(id, doc)| {
                let source = serde_json::to_vec(&doc).expect("Failed to encode seed document");
                BulkAction::index(id, source)
            })
            .collect();
        let body = encode_bulk_body(&actions).expect("Failed to encode seed batch");
        let path = format!("/{index}/_bulk?refresh=true");
        let reply = self.server.handle("POST", &path, &body);
        assert!(reply.is_success(), "seeding {index} failed with {}", reply.status);
    }

    /// Returns the number of open scroll contexts.
    pub fn open_scrolls(&self) -> usize {
        self.server.scrolls().open_scrolls()
    }

    /// Returns the number of live documents in `index`.
    pub fn doc_count(&self, index: &str) -> usize {
        self.server.store().doc_count(index)
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

fn test_repository_config(index: &str) -> RepositoryConfig {
    RepositoryConfig::new(index)
        .with_refresh_allowed(true)
        .with_refresh(docbulk_protocol::RefreshPolicy::WaitFor)
}

/// Runs a test against a fresh reference store.
///
/// # Example
///
/// ```rust,ignore
/// use docbulk_testkit::with_store;
///
/// #[test]
/// fn my_test() {
///     with_store(|store| {
///         let repo = store.repository::<serde_json::Value>("things");
///         // ... test operations
///     });
/// }
/// ```
pub fn with_store<F, R>(f: F) -> R
where
    F: FnOnce(&TestStore) -> R,
{
    init_tracing();
    let store = TestStore::new();
    f(&store)
}

/// Installs a test-friendly tracing subscriber once per process.
///
/// The filter comes from `RUST_LOG` and defaults to `warn`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        // Another subscriber may already be installed by the test binary.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// A small document used throughout the tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Title text.
    pub title: String,
    /// A counter that updates increment.
    #[serde(default)]
    pub count: u64,
}

impl Note {
    /// Creates a note with a zero counter.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            count: 0,
        }
    }

    /// Returns the note with its counter incremented.
    pub fn incremented(mut self) -> Self {
        self.count += 1;
        self
    }
}

/// Returns `n` notes keyed `note-000`, `note-001`, ...
pub fn numbered_notes(n: usize) -> Vec<(String, Note)> {
    (0..n)
        .map(|i| (format!("note-{i:03}"), Note::new(format!("note {i}"))))
        .collect()
}
