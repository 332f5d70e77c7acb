//! Async transport abstraction.

use crate::error::{ClientError, ClientResult};
use crate::transport::{DocumentTransport, VersionedDocument, WriteAck, WriteRequest};
use async_trait::async_trait;
use docbulk_protocol::{
    BulkAction, BulkItemResponse, ConcurrencyToken, RefreshPolicy, SearchPage, SearchRequest,
};
use std::sync::Arc;
use std::time::Duration;

/// Async counterpart of [`DocumentTransport`].
///
/// Arguments that cross an `.await` are owned.
#[async_trait]
pub trait AsyncDocumentTransport: Send + Sync {
    /// Sends a bulk request; returns one response per action, in order.
    async fn bulk_write(
        &self,
        index: &str,
        actions: Vec<BulkAction>,
        refresh: RefreshPolicy,
    ) -> ClientResult<Vec<BulkItemResponse>>;

    /// Reads a document; `None` if it does not exist.
    async fn get(&self, index: &str, id: &str) -> ClientResult<Option<VersionedDocument>>;

    /// Writes a single document.
    async fn write(&self, index: &str, request: WriteRequest) -> ClientResult<WriteAck>;

    /// Deletes a single document.
    async fn delete(
        &self,
        index: &str,
        id: &str,
        token: Option<ConcurrencyToken>,
        refresh: RefreshPolicy,
    ) -> ClientResult<WriteAck>;

    /// Runs a search.
    async fn search(
        &self,
        index: &str,
        request: SearchRequest,
        scroll: Option<Duration>,
    ) -> ClientResult<SearchPage>;

    /// Fetches the next page of a scroll.
    async fn advance_cursor(&self, scroll_id: &str, ttl: Duration) -> ClientResult<SearchPage>;

    /// Releases a scroll cursor.
    async fn release_cursor(&self, scroll_id: &str) -> ClientResult<()>;

    /// Counts matching documents.
    async fn count(&self, index: &str, query: Option<serde_json::Value>) -> ClientResult<u64>;

    /// Makes all previous writes visible to searches.
    async fn refresh(&self, index: &str) -> ClientResult<()>;
}

/// Adapts a blocking transport to the async trait by running every call on
/// tokio's blocking thread pool.
#[derive(Debug)]
pub struct BlockingTransport<X> {
    inner: Arc<X>,
}

impl<X> BlockingTransport<X> {
    /// Wraps a blocking transport.
    pub fn new(inner: X) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Wraps a shared blocking transport.
    pub fn from_arc(inner: Arc<X>) -> Self {
        Self { inner }
    }

    /// Returns the wrapped transport.
    pub fn inner(&self) -> &Arc<X> {
        &self.inner
    }
}

impl<X> Clone for BlockingTransport<X> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<X: DocumentTransport + 'static> BlockingTransport<X> {
    async fn offload<R, F>(&self, op: F) -> ClientResult<R>
    where
        F: FnOnce(&X) -> ClientResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || op(&inner))
            .await
            .map_err(|e| {
                if e.is_cancelled() {
                    ClientError::Cancelled
                } else {
                    ClientError::transport_fatal(format!("blocking transport task failed: {e}"))
                }
            })?
    }
}

#[async_trait]
impl<X: DocumentTransport + 'static> AsyncDocumentTransport for BlockingTransport<X> {
    async fn bulk_write(
        &self,
        index: &str,
        actions: Vec<BulkAction>,
        refresh: RefreshPolicy,
    ) -> ClientResult<Vec<BulkItemResponse>> {
        let index = index.to_string();
        self.offload(move |t| t.bulk_write(&index, &actions, refresh))
            .await
    }

    async fn get(&self, index: &str, id: &str) -> ClientResult<Option<VersionedDocument>> {
        let (index, id) = (index.to_string(), id.to_string());
        self.offload(move |t| t.get(&index, &id)).await
    }

    async fn write(&self, index: &str, request: WriteRequest) -> ClientResult<WriteAck> {
        let index = index.to_string();
        self.offload(move |t| t.write(&index, &request)).await
    }

    async fn delete(
        &self,
        index: &str,
        id: &str,
        token: Option<ConcurrencyToken>,
        refresh: RefreshPolicy,
    ) -> ClientResult<WriteAck> {
        let (index, id) = (index.to_string(), id.to_string());
        self.offload(move |t| t.delete(&index, &id, token, refresh))
            .await
    }

    async fn search(
        &self,
        index: &str,
        request: SearchRequest,
        scroll: Option<Duration>,
    ) -> ClientResult<SearchPage> {
        let index = index.to_string();
        self.offload(move |t| t.search(&index, &request, scroll))
            .await
    }

    async fn advance_cursor(&self, scroll_id: &str, ttl: Duration) -> ClientResult<SearchPage> {
        let scroll_id = scroll_id.to_string();
        self.offload(move |t| t.advance_cursor(&scroll_id, ttl)).await
    }

    async fn release_cursor(&self, scroll_id: &str) -> ClientResult<()> {
        let scroll_id = scroll_id.to_string();
        self.offload(move |t| t.release_cursor(&scroll_id)).await
    }

    async fn count(&self, index: &str, query: Option<serde_json::Value>) -> ClientResult<u64> {
        let index = index.to_string();
        self.offload(move |t| t.count(&index, query.as_ref())).await
    }

    async fn refresh(&self, index: &str) -> ClientResult<()> {
        let index = index.to_string();
        self.offload(move |t| t.refresh(&index)).await
    }
}
