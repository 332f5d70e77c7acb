//! Transport wrappers for tests.
//!
//! Each wrapper delegates to an inner [`DocumentTransport`] and adds one
//! behavior: counting calls, simulating a concurrent writer, or failing
//! requests outright.

use docbulk_client::{
    ClientError, ClientResult, DocumentTransport, VersionedDocument, WriteAck, WriteRequest,
};
use docbulk_protocol::{
    BulkAction, BulkItemResponse, ConcurrencyToken, OpType, RefreshPolicy, SearchPage,
    SearchRequest,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// Snapshot of the calls seen by a [`CountingTransport`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// Bulk requests.
    pub bulk: u64,
    /// Actions sent across all bulk requests.
    pub bulk_actions: u64,
    /// Single-document reads.
    pub get: u64,
    /// Single-document writes.
    pub write: u64,
    /// Single-document deletes.
    pub delete: u64,
    /// Initial searches.
    pub search: u64,
    /// Cursor advances.
    pub advance: u64,
    /// Cursor releases.
    pub release: u64,
    /// Counts.
    pub count: u64,
    /// Refreshes.
    pub refresh: u64,
}

#[derive(Default)]
struct Counters {
    bulk: AtomicU64,
    bulk_actions: AtomicU64,
    get: AtomicU64,
    write: AtomicU64,
    delete: AtomicU64,
    search: AtomicU64,
    advance: AtomicU64,
    release: AtomicU64,
    count: AtomicU64,
    refresh: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Counts every call before delegating.
pub struct CountingTransport<X> {
    inner: X,
    counters: Counters,
    batch_sizes: Mutex<Vec<usize>>,
}

impl<X: DocumentTransport> CountingTransport<X> {
    /// Wraps a transport.
    pub fn new(inner: X) -> Self {
        Self {
            inner,
            counters: Counters::default(),
            batch_sizes: Mutex::new(Vec::new()),
        }
    }

    /// Returns the size of every bulk request, in call order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().clone()
    }

    /// Returns the wrapped transport.
    pub fn inner(&self) -> &X {
        &self.inner
    }

    /// Returns the calls seen so far.
    pub fn counts(&self) -> CallCounts {
        let c = &self.counters;
        CallCounts {
            bulk: c.bulk.load(Ordering::Relaxed),
            bulk_actions: c.bulk_actions.load(Ordering::Relaxed),
            get: c.get.load(Ordering::Relaxed),
            write: c.write.load(Ordering::Relaxed),
            delete: c.delete.load(Ordering::Relaxed),
            search: c.search.load(Ordering::Relaxed),
            advance: c.advance.load(Ordering::Relaxed),
            release: c.release.load(Ordering::Relaxed),
            count: c.count.load(Ordering::Relaxed),
            refresh: c.refresh.load(Ordering::Relaxed),
        }
    }
}

impl<X: DocumentTransport> DocumentTransport for CountingTransport<X> {
    fn bulk_write(
        &self,
        index: &str,
        actions: &[BulkAction],
        refresh: RefreshPolicy,
    ) -> ClientResult<Vec<BulkItemResponse>> {
        bump(&self.counters.bulk);
        self.counters
            .bulk_actions
            .fetch_add(actions.len() as u64, Ordering::Relaxed);
        self.batch_sizes.lock().push(actions.len());
        self.inner.bulk_write(index, actions, refresh)
    }

    fn get(&self, index: &str, id: &str) -> ClientResult<Option<VersionedDocument>> {
        bump(&self.counters.get);
        self.inner.get(index, id)
    }

    fn write(&self, index: &str, request: &WriteRequest) -> ClientResult<WriteAck> {
        bump(&self.counters.write);
        self.inner.write(index, request)
    }

    fn delete(
        &self,
        index: &str,
        id: &str,
        token: Option<ConcurrencyToken>,
        refresh: RefreshPolicy,
    ) -> ClientResult<WriteAck> {
        bump(&self.counters.delete);
        self.inner.delete(index, id, token, refresh)
    }

    fn search(
        &self,
        index: &str,
        request: &SearchRequest,
        scroll: Option<Duration>,
    ) -> ClientResult<SearchPage> {
        bump(&self.counters.search);
        self.inner.search(index, request, scroll)
    }

    fn advance_cursor(&self, scroll_id: &str, ttl: Duration) -> ClientResult<SearchPage> {
        bump(&self.counters.advance);
        self.inner.advance_cursor(scroll_id, ttl)
    }

    fn release_cursor(&self, scroll_id: &str) -> ClientResult<()> {
        bump(&self.counters.release);
        self.inner.release_cursor(scroll_id)
    }

    fn count(&self, index: &str, query: Option<&serde_json::Value>) -> ClientResult<u64> {
        bump(&self.counters.count);
        self.inner.count(index, query)
    }

    fn refresh(&self, index: &str) -> ClientResult<()> {
        bump(&self.counters.refresh);
        self.inner.refresh(index)
    }
}

/// Simulates a concurrent writer.
///
/// Before every token-guarded write (single or bulk) the wrapper rewrites
/// the target document unchanged, which moves its version on and makes the
/// guarded write conflict. Unguarded requests pass through untouched.
pub struct ContendedTransport<X> {
    inner: X,
    remaining: AtomicU32,
    interferences: AtomicU32,
}

impl<X: DocumentTransport> ContendedTransport<X> {
    /// Interferes with every guarded write.
    pub fn always(inner: X) -> Self {
        Self::times(inner, u32::MAX)
    }

    /// Interferes with the next `n` guarded writes.
    pub fn times(inner: X, n: u32) -> Self {
        Self {
            inner,
            remaining: AtomicU32::new(n),
            interferences: AtomicU32::new(0),
        }
    }

    /// Returns the wrapped transport.
    pub fn inner(&self) -> &X {
        &self.inner
    }

    /// Returns how many writes were interfered with.
    pub fn interferences(&self) -> u32 {
        self.interferences.load(Ordering::SeqCst)
    }

    fn take_turn(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                0 => None,
                u32::MAX => Some(u32::MAX),
                n => Some(n - 1),
            })
            .is_ok()
    }

    fn interfere(&self, index: &str, id: &str) -> ClientResult<()> {
        if !self.take_turn() {
            return Ok(());
        }
        if let Some(current) = self.inner.get(index, id)? {
            let rewrite = WriteRequest::index(Some(id.to_string()), current.source);
            self.inner.write(index, &rewrite)?;
            self.interferences.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl<X: DocumentTransport> DocumentTransport for ContendedTransport<X> {
    fn bulk_write(
        &self,
        index: &str,
        actions: &[BulkAction],
        refresh: RefreshPolicy,
    ) -> ClientResult<Vec<BulkItemResponse>> {
        for action in actions {
            if let (OpType::Index, Some(_), Some(id)) = (action.op_type, action.token, &action.id) {
                self.interfere(action.index.as_deref().unwrap_or(index), id)?;
            }
        }
        self.inner.bulk_write(index, actions, refresh)
    }

    fn get(&self, index: &str, id: &str) -> ClientResult<Option<VersionedDocument>> {
        self.inner.get(index, id)
    }

    fn write(&self, index: &str, request: &WriteRequest) -> ClientResult<WriteAck> {
        if let (Some(_), Some(id)) = (request.token, &request.id) {
            self.interfere(index, id)?;
        }
        self.inner.write(index, request)
    }

    fn delete(
        &self,
        index: &str,
        id: &str,
        token: Option<ConcurrencyToken>,
        refresh: RefreshPolicy,
    ) -> ClientResult<WriteAck> {
        if token.is_some() {
            self.interfere(index, id)?;
        }
        self.inner.delete(index, id, token, refresh)
    }

    fn search(
        &self,
        index: &str,
        request: &SearchRequest,
        scroll: Option<Duration>,
    ) -> ClientResult<SearchPage> {
        self.inner.search(index, request, scroll)
    }

    fn advance_cursor(&self, scroll_id: &str, ttl: Duration) -> ClientResult<SearchPage> {
        self.inner.advance_cursor(scroll_id, ttl)
    }

    fn release_cursor(&self, scroll_id: &str) -> ClientResult<()> {
        self.inner.release_cursor(scroll_id)
    }

    fn count(&self, index: &str, query: Option<&serde_json::Value>) -> ClientResult<u64> {
        self.inner.count(index, query)
    }

    fn refresh(&self, index: &str) -> ClientResult<()> {
        self.inner.refresh(index)
    }
}

/// Fails the next `n` bulk requests with a retryable transport error
/// without reaching the inner transport.
pub struct FailingBulkTransport<X> {
    inner: X,
    remaining: AtomicU32,
}

impl<X: DocumentTransport> FailingBulkTransport<X> {
    /// Wraps a transport; the next `n` bulk requests fail.
    pub fn new(inner: X, n: u32) -> Self {
        Self {
            inner,
            remaining: AtomicU32::new(n),
        }
    }

    /// Returns the wrapped transport.
    pub fn inner(&self) -> &X {
        &self.inner
    }
}

impl<X: DocumentTransport> DocumentTransport for FailingBulkTransport<X> {
    fn bulk_write(
        &self,
        index: &str,
        actions: &[BulkAction],
        refresh: RefreshPolicy,
    ) -> ClientResult<Vec<BulkItemResponse>> {
        let fail = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(ClientError::transport_retryable("connection reset by peer"));
        }
        self.inner.bulk_write(index, actions, refresh)
    }

    fn get(&self, index: &str, id: &str) -> ClientResult<Option<VersionedDocument>> {
        self.inner.get(index, id)
    }

    fn write(&self, index: &str, request: &WriteRequest) -> ClientResult<WriteAck> {
        self.inner.write(index, request)
    }

    fn delete(
        &self,
        index: &str,
        id: &str,
        token: Option<ConcurrencyToken>,
        refresh: RefreshPolicy,
    ) -> ClientResult<WriteAck> {
        self.inner.delete(index, id, token, refresh)
    }

    fn search(
        &self,
        index: &str,
        request: &SearchRequest,
        scroll: Option<Duration>,
    ) -> ClientResult<SearchPage> {
        self.inner.search(index, request, scroll)
    }

    fn advance_cursor(&self, scroll_id: &str, ttl: Duration) -> ClientResult<SearchPage> {
        self.inner.advance_cursor(scroll_id, ttl)
    }

    fn release_cursor(&self, scroll_id: &str) -> ClientResult<()> {
        self.inner.release_cursor(scroll_id)
    }

    fn count(&self, index: &str, query: Option<&serde_json::Value>) -> ClientResult<u64> {
        self.inner.count(index, query)
    }

    fn refresh(&self, index: &str) -> ClientResult<()> {
        self.inner.refresh(index)
    }
}
