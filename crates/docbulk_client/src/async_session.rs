//! Async bulk session.
//!
//! Producers push items into a bounded channel; one consumer task drains it
//! into batches of `batch_size`, dispatches them one at a time and runs
//! conflict retries before taking the next batch. Producers suspend while
//! the channel is full.

use crate::async_transport::AsyncDocumentTransport;
use crate::codec::DocumentCodec;
use crate::config::{BulkConfig, RetryConfig};
use crate::error::{ClientError, ClientResult};
use crate::intent::{BulkItem, Transform, WriteIntent};
use crate::report::{BatchOutcome, BulkStats};
use crate::session::{check_alignment, finish_item, retry_status, route, Route};
use crate::update::{update_async, UpdateOutcome};
use docbulk_protocol::{BulkAction, ConcurrencyToken, RefreshPolicy};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

enum Command<T> {
    Item(BulkItem<T>),
    Close,
}

/// Everything the consumer task and producers share.
struct Dispatcher<X: ?Sized, C: ?Sized> {
    transport: Arc<X>,
    codec: Arc<C>,
    index: String,
    retry: RetryConfig,
    config: BulkConfig,
}

impl<X, C> Dispatcher<X, C>
where
    X: AsyncDocumentTransport + ?Sized,
    C: ?Sized,
{
    async fn dispatch<T>(&self, batch: Vec<BulkItem<T>>) -> ClientResult<BatchOutcome>
    where
        C: DocumentCodec<T>,
    {
        let actions: Vec<BulkAction> = batch.iter().map(|item| item.intent.to_action()).collect();
        let sent = actions.len();
        debug!(index = self.index.as_str(), items = sent, "flushing bulk batch");

        let responses = match self
            .transport
            .bulk_write(&self.index, actions, self.config.refresh)
            .await
        {
            Ok(responses) => responses,
            Err(e) => {
                warn!(index = self.index.as_str(), items = sent, error = %e, "bulk request failed, batch dropped");
                return Err(e);
            }
        };
        check_alignment(sent, responses.len())?;

        let mut outcome = BatchOutcome::with_capacity(sent);
        for (position, (mut item, response)) in batch.into_iter().zip(responses).enumerate() {
            let result = response.into_result();
            let status = match route(&item, &result, self.config.retry_conflicting_updates) {
                Route::Done(status) => status,
                Route::Retry { id, transform } => retry_status(self.retry_update(&id, transform).await),
            };
            finish_item(&mut outcome, &self.config, position, &mut item, result.id, status);
        }
        Ok(outcome)
    }

    async fn retry_update<T>(
        &self,
        id: &str,
        transform: Transform<T>,
    ) -> ClientResult<UpdateOutcome>
    where
        C: DocumentCodec<T>,
    {
        let retry = self
            .retry
            .clone()
            .with_max_attempts(self.config.retry_conflicting_updates);
        update_async(
            &*self.transport,
            &*self.codec,
            &self.index,
            id,
            &retry,
            RefreshPolicy::None,
            move |value| transform(value),
        )
        .await
    }
}

/// What the consumer task hands back: the totals and the first failed
/// bulk request, if any.
type ConsumerResult = (BulkStats, Option<ClientError>);

async fn run_consumer<T, X, C>(
    dispatcher: Arc<Dispatcher<X, C>>,
    mut receiver: mpsc::Receiver<Command<T>>,
) -> ConsumerResult
where
    X: AsyncDocumentTransport + ?Sized,
    C: DocumentCodec<T> + ?Sized,
{
    let batch_size = dispatcher.config.effective_batch_size();
    let mut stats = BulkStats::default();
    let mut first_error = None;
    loop {
        let mut batch = Vec::with_capacity(batch_size);
        let mut drained = false;
        while batch.len() < batch_size {
            match receiver.recv().await {
                Some(Command::Item(item)) => batch.push(item),
                // Items queued before the close still arrive
                Some(Command::Close) => receiver.close(),
                None => {
                    drained = true;
                    break;
                }
            }
        }
        if !batch.is_empty() {
            // A failed request drops only its own batch; later items still go out.
            match dispatcher.dispatch(batch).await {
                Ok(outcome) => stats.absorb(&outcome),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        if drained {
            break;
        }
    }
    info!(
        index = dispatcher.index.as_str(),
        batches = stats.batches,
        items = stats.items,
        succeeded = stats.succeeded,
        failed = stats.failed,
        retried = stats.retried,
        failed_requests = first_error.is_some(),
        "bulk session closed"
    );
    (stats, first_error)
}

/// Cloneable handle for feeding an [`AsyncBulkSession`] from many tasks.
pub struct AsyncBulkProducer<T, X: ?Sized, C: ?Sized> {
    sender: mpsc::Sender<Command<T>>,
    closed: Arc<AtomicBool>,
    dispatcher: Arc<Dispatcher<X, C>>,
}

impl<T, X: ?Sized, C: ?Sized> Clone for AsyncBulkProducer<T, X, C> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            closed: Arc::clone(&self.closed),
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }
}

impl<T, X, C> AsyncBulkProducer<T, X, C>
where
    X: AsyncDocumentTransport + ?Sized,
    C: DocumentCodec<T> + ?Sized,
{
    /// Queues a document write. See [`crate::BulkSession::index`].
    pub async fn index(&self, id: Option<&str>, document: &T, create: bool) -> ClientResult<()> {
        let payload = self.dispatcher.codec.encode(document)?;
        let intent = match id {
            Some(id) if !create => WriteIntent::Upsert {
                id: id.to_string(),
                payload,
            },
            id => WriteIntent::Create {
                id: id.map(str::to_string),
                payload,
            },
        };
        self.add(BulkItem::new(intent)).await
    }

    /// Queues `transform(original)` guarded by `token`.
    pub async fn update<F>(
        &self,
        id: &str,
        token: ConcurrencyToken,
        original: T,
        transform: F,
    ) -> ClientResult<()>
    where
        F: Fn(T) -> T + Send + Sync + 'static,
    {
        let transform: Transform<T> = Arc::new(transform);
        let payload = self.dispatcher.codec.encode(&transform(original))?;
        let item = BulkItem::new(WriteIntent::ConditionalUpdate {
            id: id.to_string(),
            token,
            payload,
        })
        .with_transform(transform);
        self.add(item).await
    }

    /// Reads `id` and queues an update of the current value.
    pub async fn get_and_update<F>(&self, id: &str, transform: F) -> ClientResult<()>
    where
        F: Fn(T) -> T + Send + Sync + 'static,
    {
        if self.is_closed() {
            return Err(ClientError::SessionClosed);
        }
        let current = self
            .dispatcher
            .transport
            .get(&self.dispatcher.index, id)
            .await?
            .ok_or_else(|| ClientError::NotFound { id: id.to_string() })?;
        let original = self.dispatcher.codec.decode(&current.source)?;
        self.update(id, current.token, original, transform).await
    }

    /// Queues a delete.
    pub async fn delete(&self, id: &str, token: Option<ConcurrencyToken>) -> ClientResult<()> {
        self.add(BulkItem::new(WriteIntent::Delete {
            id: id.to_string(),
            token,
        }))
        .await
    }

    /// Queues a prepared item, waiting while the queue is full.
    pub async fn add(&self, item: BulkItem<T>) -> ClientResult<()> {
        if self.is_closed() {
            return Err(ClientError::SessionClosed);
        }
        self.sender
            .send(Command::Item(item))
            .await
            .map_err(|_| ClientError::SessionClosed)
    }

    /// Returns true once the session stopped accepting items.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.sender.is_closed()
    }
}

/// An async bulk session over one index.
///
/// Dereferences to its [`AsyncBulkProducer`]. Dropping the session without
/// [`close`](Self::close) still flushes once every producer is gone, but the
/// outcome is only logged.
pub struct AsyncBulkSession<T, X: ?Sized, C: ?Sized> {
    producer: AsyncBulkProducer<T, X, C>,
    consumer: JoinHandle<ConsumerResult>,
}

impl<T, X, C> AsyncBulkSession<T, X, C>
where
    T: 'static,
    X: AsyncDocumentTransport + ?Sized + 'static,
    C: DocumentCodec<T> + ?Sized + 'static,
{
    /// Starts a session on the current tokio runtime.
    pub fn start(
        transport: Arc<X>,
        codec: Arc<C>,
        index: impl Into<String>,
        retry: RetryConfig,
        config: BulkConfig,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.effective_batch_size());
        let dispatcher = Arc::new(Dispatcher {
            transport,
            codec,
            index: index.into(),
            retry,
            config,
        });
        let consumer = tokio::spawn(run_consumer(Arc::clone(&dispatcher), receiver));
        Self {
            producer: AsyncBulkProducer {
                sender,
                closed: Arc::new(AtomicBool::new(false)),
                dispatcher,
            },
            consumer,
        }
    }

    /// Returns a producer handle for another task.
    pub fn producer(&self) -> AsyncBulkProducer<T, X, C> {
        self.producer.clone()
    }

    /// Stops intake, waits for the queue to drain and returns the totals.
    ///
    /// Items accepted before the close are all dispatched, also after a
    /// failed bulk request. If any request failed, the first failure is
    /// returned instead of the totals; use
    /// [`close_with_stats`](Self::close_with_stats) to get both. Appends
    /// through outstanding producers fail with [`ClientError::SessionClosed`].
    pub async fn close(self) -> ClientResult<BulkStats> {
        match self.close_with_stats().await? {
            (stats, None) => Ok(stats),
            (_, Some(e)) => Err(e),
        }
    }

    /// Like [`close`](Self::close), but returns the totals together with the
    /// first failed bulk request.
    pub async fn close_with_stats(self) -> ClientResult<(BulkStats, Option<ClientError>)> {
        let Self { producer, consumer } = self;
        producer.closed.store(true, Ordering::Release);
        // Fails only if the consumer task is gone; joining it says why.
        let _ = producer.sender.send(Command::Close).await;
        drop(producer);
        consumer.await.map_err(|e| {
            if e.is_cancelled() {
                ClientError::Cancelled
            } else {
                ClientError::transport_fatal(format!("bulk consumer task failed: {e}"))
            }
        })
    }
}

impl<T, X: ?Sized, C: ?Sized> Deref for AsyncBulkSession<T, X, C> {
    type Target = AsyncBulkProducer<T, X, C>;

    fn deref(&self) -> &Self::Target {
        &self.producer
    }
}
