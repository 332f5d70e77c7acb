//! Typed repositories over one index.

use crate::async_session::{AsyncBulkProducer, AsyncBulkSession};
use crate::async_transport::AsyncDocumentTransport;
use crate::codec::{DocumentCodec, JsonCodec};
use crate::config::{BulkConfig, RepositoryConfig, RetryConfig, SearchOptions, DEFAULT_SCROLL_TTL};
use crate::error::{ClientError, ClientResult};
use crate::report::BulkStats;
use crate::scroll::{AsyncScrollCursor, ScrollCursor, SearchResults};
use crate::session::BulkSession;
use crate::transport::{DocumentTransport, VersionedDocument, WriteAck, WriteMode, WriteRequest};
use crate::update::{update_async, UpdateCoordinator, UpdateOutcome};
use docbulk_protocol::{ConcurrencyToken, SearchRequest};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::warn;

/// A document together with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    /// Document id.
    pub id: String,
    /// Version.
    pub token: ConcurrencyToken,
    /// Decoded document.
    pub document: T,
}

fn decode_versioned<T, C>(codec: &C, doc: VersionedDocument) -> ClientResult<Versioned<T>>
where
    C: DocumentCodec<T> + ?Sized,
{
    Ok(Versioned {
        document: codec.decode(&doc.source)?,
        id: doc.id,
        token: doc.token,
    })
}

fn guarded_write(
    id: &str,
    payload: Vec<u8>,
    sequence: Option<u64>,
    epoch: Option<u64>,
) -> ClientResult<WriteRequest> {
    let token = ConcurrencyToken::from_parts(sequence, epoch)?;
    Ok(WriteRequest::index(Some(id.to_string()), payload).with_token(token))
}

fn finish_scoped(
    index: &str,
    result: ClientResult<()>,
    stats: ClientResult<BulkStats>,
) -> ClientResult<BulkStats> {
    match (result, stats) {
        (Ok(()), stats) => stats,
        (Err(e), Ok(_)) => Err(e),
        (Err(e), Err(close_err)) => {
            warn!(index, error = %close_err, "bulk close failed after block error");
            Err(e)
        }
    }
}

/// Blocking repository of `T` documents.
///
/// Reads and searches go to the read alias, writes to the write alias;
/// both fall back to the index name.
pub struct Repository<T, X, C = JsonCodec<T>> {
    transport: X,
    codec: C,
    config: RepositoryConfig,
    _marker: PhantomData<fn() -> T>,
}

impl<T, X, C> Repository<T, X, C>
where
    X: DocumentTransport,
    C: DocumentCodec<T>,
{
    /// Creates a repository.
    pub fn new(transport: X, codec: C, config: RepositoryConfig) -> Self {
        Self {
            transport,
            codec,
            config,
            _marker: PhantomData,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Returns the transport.
    pub fn transport(&self) -> &X {
        &self.transport
    }

    /// Returns the codec.
    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Creates or replaces a document. Without an id the store assigns one.
    pub fn index(&self, id: Option<&str>, document: &T) -> ClientResult<WriteAck> {
        let request = WriteRequest::index(id.map(str::to_string), self.codec.encode(document)?)
            .with_refresh(self.config.refresh);
        self.transport.write(self.config.write_target(), &request)
    }

    /// Creates a document; conflicts if the id exists.
    pub fn create(&self, id: Option<&str>, document: &T) -> ClientResult<WriteAck> {
        let request = WriteRequest::index(id.map(str::to_string), self.codec.encode(document)?)
            .with_mode(WriteMode::Create)
            .with_refresh(self.config.refresh);
        self.transport.write(self.config.write_target(), &request)
    }

    /// Replaces a document if it is still at the given version.
    ///
    /// `sequence` and `epoch` must be given together or not at all.
    pub fn index_if(
        &self,
        id: &str,
        document: &T,
        sequence: Option<u64>,
        epoch: Option<u64>,
    ) -> ClientResult<WriteAck> {
        let request = guarded_write(id, self.codec.encode(document)?, sequence, epoch)?
            .with_refresh(self.config.refresh);
        self.transport.write(self.config.write_target(), &request)
    }

    /// Reads a document.
    pub fn get(&self, id: &str) -> ClientResult<Option<T>> {
        Ok(self.get_with_token(id)?.map(|v| v.document))
    }

    /// Reads a document together with its version.
    pub fn get_with_token(&self, id: &str) -> ClientResult<Option<Versioned<T>>> {
        self.transport
            .get(self.config.read_target(), id)?
            .map(|doc| decode_versioned(&self.codec, doc))
            .transpose()
    }

    /// Replaces `id` with `transform(current)`, retrying conflicts per the
    /// repository's retry configuration.
    pub fn update<F>(&self, id: &str, transform: F) -> ClientResult<UpdateOutcome>
    where
        F: Fn(T) -> T,
    {
        self.update_with_retry(id, self.config.retry.clone(), transform)
    }

    /// Like [`update`](Self::update) with an explicit retry configuration.
    pub fn update_with_retry<F>(
        &self,
        id: &str,
        retry: RetryConfig,
        transform: F,
    ) -> ClientResult<UpdateOutcome>
    where
        F: Fn(T) -> T,
    {
        UpdateCoordinator::new(&self.transport, &self.codec, self.config.write_target())
            .with_retry(retry)
            .with_refresh(self.config.refresh)
            .update(id, transform)
    }

    /// Deletes a document, optionally guarded by its version.
    pub fn delete(&self, id: &str, token: Option<ConcurrencyToken>) -> ClientResult<WriteAck> {
        self.transport
            .delete(self.config.write_target(), id, token, self.config.refresh)
    }

    /// Counts documents matching `query` (all documents for `None`).
    pub fn count(&self, query: Option<&serde_json::Value>) -> ClientResult<u64> {
        self.transport.count(self.config.read_target(), query)
    }

    /// Makes all previous writes visible to searches.
    pub fn refresh(&self) -> ClientResult<()> {
        if !self.config.refresh_allowed {
            return Err(ClientError::RefreshNotAllowed);
        }
        self.transport.refresh(self.config.read_target())
    }

    /// Searches documents. A scrolling search walks every page; otherwise
    /// only the first page is returned.
    pub fn search(
        &self,
        query: Option<serde_json::Value>,
        options: &SearchOptions,
    ) -> ClientResult<SearchResults<'_, T, X, C>> {
        let request = SearchRequest::new(query, options.page_size);
        let first = self
            .transport
            .search(self.config.read_target(), &request, options.scroll)?;
        let cursor = ScrollCursor::new(
            &self.transport,
            first,
            options.scroll.unwrap_or(DEFAULT_SCROLL_TTL),
        );
        Ok(SearchResults::new(cursor, &self.codec))
    }

    /// Opens a bulk session writing to the write alias.
    pub fn bulk_session(&self, config: BulkConfig) -> BulkSession<'_, T, X, C> {
        BulkSession::new(&self.transport, &self.codec, self.config.write_target(), config)
            .with_retry(self.config.retry.clone())
    }

    /// Runs `block` against a fresh session and closes it, also when the
    /// block fails. The block's error wins over a close error.
    pub fn bulk<F>(&self, config: BulkConfig, block: F) -> ClientResult<BulkStats>
    where
        F: FnOnce(&BulkSession<'_, T, X, C>) -> ClientResult<()>,
    {
        let session = self.bulk_session(config);
        let result = block(&session);
        let stats = session.close();
        finish_scoped(self.config.write_target(), result, stats)
    }
}

/// Async repository of `T` documents.
pub struct AsyncRepository<T, X: ?Sized, C: ?Sized = JsonCodec<T>> {
    transport: Arc<X>,
    codec: Arc<C>,
    config: RepositoryConfig,
    _marker: PhantomData<fn() -> T>,
}

impl<T, X: ?Sized, C: ?Sized> Clone for AsyncRepository<T, X, C> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            codec: Arc::clone(&self.codec),
            config: self.config.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T, X, C> AsyncRepository<T, X, C>
where
    X: AsyncDocumentTransport + ?Sized,
    C: DocumentCodec<T> + ?Sized,
{
    /// Creates a repository.
    pub fn new(transport: Arc<X>, codec: Arc<C>, config: RepositoryConfig) -> Self {
        Self {
            transport,
            codec,
            config,
            _marker: PhantomData,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Returns the transport.
    pub fn transport(&self) -> &Arc<X> {
        &self.transport
    }

    /// Creates or replaces a document.
    pub async fn index(&self, id: Option<&str>, document: &T) -> ClientResult<WriteAck> {
        let request = WriteRequest::index(id.map(str::to_string), self.codec.encode(document)?)
            .with_refresh(self.config.refresh);
        self.transport.write(self.config.write_target(), request).await
    }

    /// Creates a document; conflicts if the id exists.
    pub async fn create(&self, id: Option<&str>, document: &T) -> ClientResult<WriteAck> {
        let request = WriteRequest::index(id.map(str::to_string), self.codec.encode(document)?)
            .with_mode(WriteMode::Create)
            .with_refresh(self.config.refresh);
        self.transport.write(self.config.write_target(), request).await
    }

    /// Replaces a document if it is still at the given version.
    pub async fn index_if(
        &self,
        id: &str,
        document: &T,
        sequence: Option<u64>,
        epoch: Option<u64>,
    ) -> ClientResult<WriteAck> {
        let request = guarded_write(id, self.codec.encode(document)?, sequence, epoch)?
            .with_refresh(self.config.refresh);
        self.transport.write(self.config.write_target(), request).await
    }

    /// Reads a document.
    pub async fn get(&self, id: &str) -> ClientResult<Option<T>> {
        Ok(self.get_with_token(id).await?.map(|v| v.document))
    }

    /// Reads a document together with its version.
    pub async fn get_with_token(&self, id: &str) -> ClientResult<Option<Versioned<T>>> {
        self.transport
            .get(self.config.read_target(), id)
            .await?
            .map(|doc| decode_versioned(&*self.codec, doc))
            .transpose()
    }

    /// Replaces `id` with `transform(current)`, retrying conflicts per the
    /// repository's retry configuration.
    pub async fn update<F>(&self, id: &str, transform: F) -> ClientResult<UpdateOutcome>
    where
        F: Fn(T) -> T,
    {
        self.update_with_retry(id, self.config.retry.clone(), transform)
            .await
    }

    /// Like [`update`](Self::update) with an explicit retry configuration.
    pub async fn update_with_retry<F>(
        &self,
        id: &str,
        retry: RetryConfig,
        transform: F,
    ) -> ClientResult<UpdateOutcome>
    where
        F: Fn(T) -> T,
    {
        update_async(
            &*self.transport,
            &*self.codec,
            self.config.write_target(),
            id,
            &retry,
            self.config.refresh,
            transform,
        )
        .await
    }

    /// Deletes a document, optionally guarded by its version.
    pub async fn delete(&self, id: &str, token: Option<ConcurrencyToken>) -> ClientResult<WriteAck> {
        self.transport
            .delete(self.config.write_target(), id, token, self.config.refresh)
            .await
    }

    /// Counts documents matching `query`.
    pub async fn count(&self, query: Option<serde_json::Value>) -> ClientResult<u64> {
        self.transport.count(self.config.read_target(), query).await
    }

    /// Makes all previous writes visible to searches.
    pub async fn refresh(&self) -> ClientResult<()> {
        if !self.config.refresh_allowed {
            return Err(ClientError::RefreshNotAllowed);
        }
        self.transport.refresh(self.config.read_target()).await
    }

    /// Searches documents and returns a cursor over the hits.
    pub async fn search(
        &self,
        query: Option<serde_json::Value>,
        options: &SearchOptions,
    ) -> ClientResult<AsyncScrollCursor<X>> {
        let request = SearchRequest::new(query, options.page_size);
        let first = self
            .transport
            .search(self.config.read_target(), request, options.scroll)
            .await?;
        Ok(AsyncScrollCursor::new(
            Arc::clone(&self.transport),
            first,
            options.scroll.unwrap_or(DEFAULT_SCROLL_TTL),
        ))
    }

    /// Searches and decodes every hit, releasing the cursor at the end.
    pub async fn search_documents(
        &self,
        query: Option<serde_json::Value>,
        options: &SearchOptions,
    ) -> ClientResult<Vec<T>> {
        let mut cursor = self.search(query, options).await?;
        let mut documents = Vec::new();
        while let Some(hit) = cursor.next_hit().await {
            documents.push(self.codec.decode(&hit?.source)?);
        }
        Ok(documents)
    }
}

impl<T, X, C> AsyncRepository<T, X, C>
where
    T: 'static,
    X: AsyncDocumentTransport + ?Sized + 'static,
    C: DocumentCodec<T> + ?Sized + 'static,
{
    /// Starts a bulk session writing to the write alias.
    pub fn bulk_session(&self, config: BulkConfig) -> AsyncBulkSession<T, X, C> {
        AsyncBulkSession::start(
            Arc::clone(&self.transport),
            Arc::clone(&self.codec),
            self.config.write_target(),
            self.config.retry.clone(),
            config,
        )
    }

    /// Runs `block` with a producer and closes the session afterwards, also
    /// when the block fails.
    pub async fn bulk<F, Fut>(&self, config: BulkConfig, block: F) -> ClientResult<BulkStats>
    where
        F: FnOnce(AsyncBulkProducer<T, X, C>) -> Fut,
        Fut: Future<Output = ClientResult<()>>,
    {
        let session = self.bulk_session(config);
        let result = block(session.producer()).await;
        let stats = session.close().await;
        finish_scoped(self.config.write_target(), result, stats)
    }
}
