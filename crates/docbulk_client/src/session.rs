//! Blocking bulk session.
//!
//! A session buffers write intents and sends them as bulk requests of
//! `batch_size` items. The producer whose append crosses the threshold
//! performs the flush on its own thread; other producers keep appending to
//! the fresh buffer meanwhile. Per-item outcomes are routed after every
//! flush: conflicting conditional updates may be re-run through the update
//! coordinator, everything else is counted and reported.

use crate::buffer::{BatchBuffer, BatchSnapshot};
use crate::codec::DocumentCodec;
use crate::config::{BulkConfig, RetryConfig};
use crate::error::{ClientError, ClientResult};
use crate::intent::{BulkItem, Transform, WriteIntent};
use crate::report::{BatchOutcome, BulkStats, ItemReport, ItemStatus};
use crate::transport::DocumentTransport;
use crate::update::{UpdateCoordinator, UpdateOutcome};
use docbulk_protocol::{BulkAction, ConcurrencyToken, FailureCategory, ItemResult, RefreshPolicy};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Routing decision for one item result.
pub(crate) enum Route<T> {
    /// Final status is known.
    Done(ItemStatus),
    /// Re-run the conditional update through the coordinator.
    Retry {
        id: String,
        transform: Transform<T>,
    },
}

pub(crate) fn route<T>(item: &BulkItem<T>, result: &ItemResult, retry_budget: u32) -> Route<T> {
    let Some(category) = result.category() else {
        return Route::Done(ItemStatus::Succeeded {
            token: result.token(),
        });
    };
    if category == FailureCategory::Conflict && retry_budget > 0 {
        if let (WriteIntent::ConditionalUpdate { id, .. }, Some(transform)) =
            (&item.intent, &item.transform)
        {
            debug!(id = id.as_str(), "bulk update conflicted, retrying");
            return Route::Retry {
                id: id.clone(),
                transform: Arc::clone(transform),
            };
        }
    }
    let mut message = result.failure_message();
    if message.is_empty() {
        message = format!("status {}", result.status);
    }
    Route::Done(ItemStatus::Failed { category, message })
}

pub(crate) fn retry_status(result: ClientResult<UpdateOutcome>) -> ItemStatus {
    match result {
        Ok(outcome) => ItemStatus::Retried {
            attempts: outcome.attempts,
            token: outcome.ack.token,
        },
        Err(e) => ItemStatus::Failed {
            category: e.category(),
            message: e.to_string(),
        },
    }
}

/// Records the report of one item and fires its callbacks.
///
/// Failures are logged unless a session callback is installed.
pub(crate) fn finish_item<T>(
    outcome: &mut BatchOutcome,
    config: &BulkConfig,
    position: usize,
    item: &mut BulkItem<T>,
    reported_id: Option<String>,
    status: ItemStatus,
) {
    let report = ItemReport {
        position,
        kind: item.intent.kind(),
        id: reported_id.or_else(|| item.intent.id().map(str::to_string)),
        status,
    };
    item.notify(&report);
    match &config.item_callback {
        Some(callback) => callback(&report),
        None => {
            if let ItemStatus::Failed { category, message } = &report.status {
                warn!(
                    id = report.id.as_deref().unwrap_or_default(),
                    kind = ?report.kind,
                    ?category,
                    %message,
                    "bulk item failed"
                );
            }
        }
    }
    outcome.record(report);
}

pub(crate) fn check_alignment(sent: usize, received: usize) -> ClientResult<()> {
    if sent != received {
        return Err(ClientError::Protocol(format!(
            "bulk response has {received} items for {sent} actions"
        )));
    }
    Ok(())
}

/// A blocking bulk session over one index.
///
/// `BulkSession` is `Sync`: many threads may share `&BulkSession` and append
/// concurrently. Flushes are serialized per session.
///
/// # Example
///
/// ```rust,ignore
/// let session = BulkSession::new(&transport, &codec, "things", BulkConfig::new(2));
/// session.index(Some("1"), &Thing::new("hi"), false)?;
/// session.index(Some("2"), &Thing::new("world"), false)?; // flushes 2 items
/// session.index(Some("3"), &Thing::new("."), false)?;
/// let stats = session.close()?; // flushes the last item
/// ```
pub struct BulkSession<'s, T, X, C>
where
    X: DocumentTransport + ?Sized,
    C: DocumentCodec<T> + ?Sized,
{
    transport: &'s X,
    codec: &'s C,
    index: &'s str,
    retry: RetryConfig,
    config: BulkConfig,
    buffer: BatchBuffer<BulkItem<T>>,
    dispatch: Mutex<BulkStats>,
}

impl<'s, T, X, C> BulkSession<'s, T, X, C>
where
    X: DocumentTransport + ?Sized,
    C: DocumentCodec<T> + ?Sized,
{
    /// Creates a session writing to `index`.
    pub fn new(transport: &'s X, codec: &'s C, index: &'s str, config: BulkConfig) -> Self {
        Self {
            transport,
            codec,
            index,
            retry: RetryConfig::default(),
            buffer: BatchBuffer::with_capacity(config.effective_batch_size()),
            config,
            dispatch: Mutex::new(BulkStats::default()),
        }
    }

    /// Sets the backoff used by conflict retries. The attempt budget comes
    /// from [`BulkConfig::retry_conflicting_updates`].
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the target index.
    pub fn index_name(&self) -> &str {
        self.index
    }

    /// Returns the configuration.
    pub fn config(&self) -> &BulkConfig {
        &self.config
    }

    /// Buffers a document write.
    ///
    /// Without an id the store assigns one (create). With an id the write
    /// is a create when `create` is set, an upsert otherwise.
    pub fn index(&self, id: Option<&str>, document: &T, create: bool) -> ClientResult<()> {
        let payload = self.codec.encode(document)?;
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
        self.add(BulkItem::new(intent))
    }

    /// Buffers `transform(original)` guarded by `token`.
    ///
    /// The transform is kept so a conflicting item can be re-applied to a
    /// fresh read.
    pub fn update<F>(
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
        let payload = self.codec.encode(&transform(original))?;
        let intent = WriteIntent::ConditionalUpdate {
            id: id.to_string(),
            token,
            payload,
        };
        self.add(BulkItem::new(intent).with_transform(transform))
    }

    /// Reads `id` and buffers an update of the current value.
    pub fn get_and_update<F>(&self, id: &str, transform: F) -> ClientResult<()>
    where
        F: Fn(T) -> T + Send + Sync + 'static,
    {
        if self.buffer.is_sealed() {
            return Err(ClientError::SessionClosed);
        }
        let current = self
            .transport
            .get(self.index, id)?
            .ok_or_else(|| ClientError::NotFound { id: id.to_string() })?;
        let original = self.codec.decode(&current.source)?;
        self.update(id, current.token, original, transform)
    }

    /// Buffers a delete.
    pub fn delete(&self, id: &str, token: Option<ConcurrencyToken>) -> ClientResult<()> {
        self.add(BulkItem::new(WriteIntent::Delete {
            id: id.to_string(),
            token,
        }))
    }

    /// Buffers a prepared item and flushes if the batch is full.
    pub fn add(&self, item: BulkItem<T>) -> ClientResult<()> {
        let batch_size = self.config.effective_batch_size();
        let pending = self
            .buffer
            .append(item)
            .map_err(|_| ClientError::SessionClosed)?;
        if pending >= batch_size {
            let mut stats = self.dispatch.lock();
            // Another crosser may have flushed while we waited.
            if self.buffer.len() >= batch_size {
                let snapshot = self.buffer.take_snapshot();
                self.dispatch_batch(&mut stats, snapshot)?;
            }
        }
        Ok(())
    }

    /// Flushes everything pending now.
    pub fn flush(&self) -> ClientResult<BatchOutcome> {
        let mut stats = self.dispatch.lock();
        let snapshot = self.buffer.take_snapshot();
        self.dispatch_batch(&mut stats, snapshot)
    }

    /// Stops intake and flushes the remainder. Closing twice is a no-op.
    pub fn close(&self) -> ClientResult<BulkStats> {
        let mut stats = self.dispatch.lock();
        if self.buffer.is_sealed() {
            return Ok(*stats);
        }
        let remainder = self.buffer.seal();
        self.dispatch_batch(&mut stats, remainder)?;
        info!(
            index = self.index,
            batches = stats.batches,
            items = stats.items,
            succeeded = stats.succeeded,
            failed = stats.failed,
            retried = stats.retried,
            "bulk session closed"
        );
        Ok(*stats)
    }

    /// Returns true once the session stopped accepting items.
    pub fn is_closed(&self) -> bool {
        self.buffer.is_sealed()
    }

    /// Returns the number of buffered items.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Returns cumulative statistics.
    pub fn stats(&self) -> BulkStats {
        *self.dispatch.lock()
    }

    fn dispatch_batch(
        &self,
        stats: &mut BulkStats,
        snapshot: BatchSnapshot<BulkItem<T>>,
    ) -> ClientResult<BatchOutcome> {
        if snapshot.is_empty() {
            return Ok(BatchOutcome::default());
        }
        let actions: Vec<BulkAction> = snapshot.iter().map(|item| item.intent.to_action()).collect();
        debug!(index = self.index, items = actions.len(), "flushing bulk batch");

        let responses = self
            .transport
            .bulk_write(self.index, &actions, self.config.refresh)
            .map_err(|e| {
                warn!(index = self.index, items = actions.len(), error = %e, "bulk request failed, batch dropped");
                e
            })?;
        check_alignment(actions.len(), responses.len())?;

        let mut outcome = BatchOutcome::with_capacity(actions.len());
        for (position, (mut item, response)) in snapshot.into_iter().zip(responses).enumerate() {
            let result = response.into_result();
            let status = match route(&item, &result, self.config.retry_conflicting_updates) {
                Route::Done(status) => status,
                Route::Retry { id, transform } => self.retry_update(&id, &transform),
            };
            finish_item(&mut outcome, &self.config, position, &mut item, result.id, status);
        }
        stats.absorb(&outcome);
        Ok(outcome)
    }

    fn retry_update(&self, id: &str, transform: &Transform<T>) -> ItemStatus {
        let retry = self
            .retry
            .clone()
            .with_max_attempts(self.config.retry_conflicting_updates);
        // Retries never wait for a refresh, whatever the batch asked for.
        let result = UpdateCoordinator::new(self.transport, self.codec, self.index)
            .with_retry(retry)
            .with_refresh(RefreshPolicy::None)
            .update(id, |value| transform(value));
        retry_status(result)
    }
}

impl<T, X, C> Drop for BulkSession<'_, T, X, C>
where
    X: DocumentTransport + ?Sized,
    C: DocumentCodec<T> + ?Sized,
{
    fn drop(&mut self) {
        if !self.buffer.is_sealed() {
            if let Err(e) = self.close() {
                warn!(index = self.index, error = %e, "flush of dropped bulk session failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::report::IntentKind;
    use crate::transport::MockTransport;
    use docbulk_protocol::OpType;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        text: String,
    }

    fn note(text: &str) -> Note {
        Note { text: text.into() }
    }

    fn session<'a>(
        transport: &'a MockTransport,
        codec: &'a JsonCodec<Note>,
        config: BulkConfig,
    ) -> BulkSession<'a, Note, MockTransport, JsonCodec<Note>> {
        BulkSession::new(transport, codec, "notes", config).with_retry(
            RetryConfig::new(1).with_backoff(Duration::ZERO, Duration::from_millis(1)),
        )
    }

    #[test]
    fn flushes_on_threshold_and_close() {
        let transport = MockTransport::new();
        let codec = JsonCodec::new();
        let s = session(&transport, &codec, BulkConfig::new(2));

        s.index(Some("1"), &note("hi"), false).unwrap();
        assert_eq!(transport.batch_sizes(), Vec::<usize>::new());
        s.index(Some("2"), &note("world"), false).unwrap();
        assert_eq!(transport.batch_sizes(), vec![2]);
        s.index(Some("3"), &note("."), false).unwrap();
        assert_eq!(s.pending(), 1);

        let stats = s.close().unwrap();
        assert_eq!(transport.batch_sizes(), vec![2, 1]);
        assert_eq!(stats.batches, 2);
        assert_eq!(stats.succeeded, 3);
        assert_eq!(transport.document("3").unwrap().source, br#"{"text":"."}"#.to_vec());
    }

    #[test]
    fn closed_session_rejects_items_and_close_is_idempotent() {
        let transport = MockTransport::new();
        let codec = JsonCodec::new();
        let s = session(&transport, &codec, BulkConfig::new(10));
        s.delete("x", None).unwrap();
        s.close().unwrap();
        s.close().unwrap();

        assert!(s.is_closed());
        assert!(matches!(
            s.index(None, &note("late"), false),
            Err(ClientError::SessionClosed)
        ));
        assert_eq!(transport.batch_sizes(), vec![1]);
    }

    #[test]
    fn intents_map_to_actions() {
        let transport = MockTransport::new();
        let codec = JsonCodec::new();
        let s = session(&transport, &codec, BulkConfig::new(10));
        s.index(None, &note("a"), false).unwrap();
        s.index(Some("b"), &note("b"), true).unwrap();
        s.index(Some("c"), &note("c"), false).unwrap();
        s.flush().unwrap();

        let ops: Vec<(OpType, Option<String>)> = transport.bulk_calls()[0]
            .iter()
            .map(|a| (a.op_type, a.id.clone()))
            .collect();
        assert_eq!(
            ops,
            vec![
                (OpType::Create, None),
                (OpType::Create, Some("b".into())),
                (OpType::Index, Some("c".into())),
            ]
        );
    }

    #[test]
    fn failed_items_are_counted_not_raised() {
        let transport = MockTransport::new();
        transport.put_document("taken", b"{}");
        let codec = JsonCodec::new();
        let s = session(&transport, &codec, BulkConfig::new(10));
        s.index(Some("taken"), &note("dup"), true).unwrap();
        s.delete("missing", None).unwrap();
        s.index(Some("ok"), &note("fine"), false).unwrap();

        let outcome = s.flush().unwrap();
        assert_eq!(outcome.succeeded, 1);
        assert_eq!(outcome.failed, 2);
        let categories: Vec<_> = outcome
            .failures()
            .map(|r| match &r.status {
                ItemStatus::Failed { category, .. } => *category,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(
            categories,
            vec![FailureCategory::Conflict, FailureCategory::NotFound]
        );
    }

    #[test]
    fn conflicting_update_is_retried_against_fresh_read() {
        let transport = MockTransport::new();
        let stale = transport.put_document("n", br#"{"text":"v1"}"#);
        transport.put_document("n", br#"{"text":"v2"}"#);
        let codec = JsonCodec::new();
        let s = session(&transport, &codec, BulkConfig::new(10).with_retry_conflicting_updates(2));

        s.update("n", stale, note("v1"), |n: Note| Note {
            text: format!("{}!", n.text),
        })
        .unwrap();
        let outcome = s.flush().unwrap();

        assert_eq!(outcome.retried, 1);
        assert_eq!(outcome.succeeded, 1);
        assert!(matches!(
            outcome.reports[0].status,
            ItemStatus::Retried { attempts: 1, .. }
        ));
        assert_eq!(
            transport.document("n").unwrap().source,
            br#"{"text":"v2!"}"#.to_vec()
        );
    }

    #[test]
    fn conflicts_without_budget_fail() {
        let transport = MockTransport::new();
        let stale = transport.put_document("n", br#"{"text":"v1"}"#);
        transport.put_document("n", br#"{"text":"v2"}"#);
        let codec = JsonCodec::new();
        let s = session(&transport, &codec, BulkConfig::new(10));

        s.update("n", stale, note("v1"), |n| n).unwrap();
        let outcome = s.flush().unwrap();
        assert_eq!(outcome.failed, 1);
        assert_eq!(transport.writes(), 0);
    }

    #[test]
    fn get_and_update_of_missing_document() {
        let transport = MockTransport::new();
        let codec = JsonCodec::new();
        let s = session(&transport, &codec, BulkConfig::new(10));
        assert!(matches!(
            s.get_and_update("nope", |n: Note| n),
            Err(ClientError::NotFound { .. })
        ));
        assert_eq!(s.pending(), 0);
    }

    #[test]
    fn callbacks_fire_once_per_item() {
        let transport = MockTransport::new();
        let codec = JsonCodec::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let session_seen = Arc::clone(&seen);
        let config = BulkConfig::new(10).with_item_callback(move |report| {
            assert_eq!(report.kind, IntentKind::Upsert);
            session_seen.fetch_add(1, Ordering::SeqCst);
        });
        let s = session(&transport, &codec, config);

        let item_seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&item_seen);
        let payload = codec.encode(&note("x")).unwrap();
        s.add(
            BulkItem::new(WriteIntent::Upsert {
                id: "x".into(),
                payload,
            })
            .with_callback(move |report| {
                assert!(report.status.is_success());
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
        s.index(Some("y"), &note("y"), false).unwrap();
        s.close().unwrap();

        assert_eq!(item_seen.load(Ordering::SeqCst), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn transport_failure_fails_the_flush() {
        let transport = MockTransport::new();
        transport.fail_next_bulk("connection reset");
        let codec = JsonCodec::new();
        let s = session(&transport, &codec, BulkConfig::new(10));
        s.index(Some("a"), &note("a"), false).unwrap();

        assert!(s.flush().unwrap_err().is_retryable());
        assert_eq!(s.pending(), 0);
        assert_eq!(s.stats().batches, 0);
    }

    #[test]
    fn drop_flushes_remainder() {
        let transport = MockTransport::new();
        let codec = JsonCodec::new();
        {
            let s = session(&transport, &codec, BulkConfig::new(10));
            s.index(Some("a"), &note("a"), false).unwrap();
        }
        assert_eq!(transport.batch_sizes(), vec![1]);
    }

    #[test]
    fn misaligned_response_is_a_protocol_error() {
        assert!(check_alignment(2, 2).is_ok());
        assert!(matches!(
            check_alignment(2, 1),
            Err(ClientError::Protocol(_))
        ));
    }
}
