//! Forward-only cursors over search results.
//!
//! A cursor starts from the first page of a search. Once that page is
//! drained it advances the server-side scroll, as long as the previous page
//! was non-empty and the store handed out a handle. The first empty page
//! (or missing handle) ends the cursor, which then releases the last known
//! handle exactly once.

use crate::async_transport::AsyncDocumentTransport;
use crate::codec::DocumentCodec;
use crate::error::ClientResult;
use crate::transport::DocumentTransport;
use docbulk_protocol::{SearchHit, SearchPage, TotalHits};
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Page bookkeeping shared by the blocking and async cursors.
#[derive(Debug)]
struct PageState {
    page: std::vec::IntoIter<SearchHit>,
    scroll_id: Option<String>,
    can_advance: bool,
    terminal: bool,
    total: TotalHits,
    pages: u64,
    yielded: u64,
}

impl PageState {
    fn new(first: SearchPage) -> Self {
        let mut state = Self {
            page: Vec::new().into_iter(),
            scroll_id: None,
            can_advance: false,
            terminal: false,
            total: first.total,
            pages: 0,
            yielded: 0,
        };
        state.load(first);
        state
    }

    fn load(&mut self, page: SearchPage) {
        self.pages += 1;
        self.can_advance = !page.hits.is_empty() && page.scroll_id.is_some();
        if page.scroll_id.is_some() {
            self.scroll_id = page.scroll_id;
        }
        self.page = page.hits.into_iter();
    }

    fn next_buffered(&mut self) -> Option<SearchHit> {
        let hit = self.page.next()?;
        self.yielded += 1;
        Some(hit)
    }

    /// Handle to advance with, or `None` when the cursor is done.
    fn advance_handle(&self) -> Option<String> {
        if self.terminal || !self.can_advance {
            return None;
        }
        self.scroll_id.clone()
    }

    /// Marks the cursor terminal and hands out the handle to release, once.
    fn finish(&mut self) -> Option<String> {
        self.terminal = true;
        self.page = Vec::new().into_iter();
        self.scroll_id.take()
    }
}

/// Blocking scroll cursor.
///
/// Yields `ClientResult<SearchHit>`; an advance failure is yielded once,
/// after which the cursor is exhausted. Dropping an unfinished cursor
/// releases its handle.
pub struct ScrollCursor<'t, X: DocumentTransport + ?Sized> {
    transport: &'t X,
    ttl: Duration,
    state: PageState,
}

impl<'t, X: DocumentTransport + ?Sized> ScrollCursor<'t, X> {
    /// Creates a cursor from the first page of a search.
    pub fn new(transport: &'t X, first: SearchPage, ttl: Duration) -> Self {
        Self {
            transport,
            ttl,
            state: PageState::new(first),
        }
    }

    /// Total hits as reported by the first page.
    pub fn total_hits(&self) -> TotalHits {
        self.state.total
    }

    /// Current cursor handle, if still held.
    pub fn scroll_id(&self) -> Option<&str> {
        self.state.scroll_id.as_deref()
    }

    /// Pages received so far, including the first.
    pub fn pages_fetched(&self) -> u64 {
        self.state.pages
    }

    /// Hits yielded so far.
    pub fn hits_yielded(&self) -> u64 {
        self.state.yielded
    }

    /// Returns true once the cursor will yield nothing more.
    pub fn is_exhausted(&self) -> bool {
        self.state.terminal
    }

    /// Stops the cursor and releases its handle now.
    pub fn release(&mut self) -> ClientResult<()> {
        match self.state.finish() {
            Some(handle) => self.transport.release_cursor(&handle),
            None => Ok(()),
        }
    }

    fn finish_quietly(&mut self) {
        if let Some(handle) = self.state.finish() {
            if let Err(e) = self.transport.release_cursor(&handle) {
                warn!(error = %e, "failed to release scroll cursor");
            }
        }
    }
}

impl<X: DocumentTransport + ?Sized> Iterator for ScrollCursor<'_, X> {
    type Item = ClientResult<SearchHit>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(hit) = self.state.next_buffered() {
                return Some(Ok(hit));
            }
            if self.state.terminal {
                return None;
            }
            let Some(handle) = self.state.advance_handle() else {
                debug!(hits = self.state.yielded, pages = self.state.pages, "scroll exhausted");
                self.finish_quietly();
                return None;
            };
            match self.transport.advance_cursor(&handle, self.ttl) {
                Ok(page) => self.state.load(page),
                Err(e) => {
                    self.finish_quietly();
                    return Some(Err(e));
                }
            }
        }
    }
}

impl<X: DocumentTransport + ?Sized> FusedIterator for ScrollCursor<'_, X> {}

impl<X: DocumentTransport + ?Sized> Drop for ScrollCursor<'_, X> {
    fn drop(&mut self) {
        if !self.state.terminal {
            self.finish_quietly();
        }
    }
}

/// Async scroll cursor.
///
/// Async code cannot run in `Drop`: an abandoned cursor keeps its handle
/// until the store's lease expires. Drain it or call
/// [`release`](Self::release).
pub struct AsyncScrollCursor<X: AsyncDocumentTransport + ?Sized> {
    transport: Arc<X>,
    ttl: Duration,
    state: PageState,
}

impl<X: AsyncDocumentTransport + ?Sized> AsyncScrollCursor<X> {
    /// Creates a cursor from the first page of a search.
    pub fn new(transport: Arc<X>, first: SearchPage, ttl: Duration) -> Self {
        Self {
            transport,
            ttl,
            state: PageState::new(first),
        }
    }

    /// Total hits as reported by the first page.
    pub fn total_hits(&self) -> TotalHits {
        self.state.total
    }

    /// Current cursor handle, if still held.
    pub fn scroll_id(&self) -> Option<&str> {
        self.state.scroll_id.as_deref()
    }

    /// Pages received so far, including the first.
    pub fn pages_fetched(&self) -> u64 {
        self.state.pages
    }

    /// Returns true once the cursor will yield nothing more.
    pub fn is_exhausted(&self) -> bool {
        self.state.terminal
    }

    /// Returns the next hit, `None` when exhausted.
    pub async fn next_hit(&mut self) -> Option<ClientResult<SearchHit>> {
        loop {
            if let Some(hit) = self.state.next_buffered() {
                return Some(Ok(hit));
            }
            if self.state.terminal {
                return None;
            }
            let Some(handle) = self.state.advance_handle() else {
                debug!(hits = self.state.yielded, pages = self.state.pages, "scroll exhausted");
                self.finish_quietly().await;
                return None;
            };
            match self.transport.advance_cursor(&handle, self.ttl).await {
                Ok(page) => self.state.load(page),
                Err(e) => {
                    self.finish_quietly().await;
                    return Some(Err(e));
                }
            }
        }
    }

    /// Drains the cursor into a vector, stopping at the first error.
    pub async fn collect_hits(&mut self) -> ClientResult<Vec<SearchHit>> {
        let mut hits = Vec::new();
        while let Some(hit) = self.next_hit().await {
            hits.push(hit?);
        }
        Ok(hits)
    }

    /// Stops the cursor and releases its handle now.
    pub async fn release(&mut self) -> ClientResult<()> {
        match self.state.finish() {
            Some(handle) => self.transport.release_cursor(&handle).await,
            None => Ok(()),
        }
    }

    async fn finish_quietly(&mut self) {
        if let Some(handle) = self.state.finish() {
            if let Err(e) = self.transport.release_cursor(&handle).await {
                warn!(error = %e, "failed to release scroll cursor");
            }
        }
    }
}

/// Typed view over a blocking cursor.
pub struct SearchResults<'r, T, X, C>
where
    X: DocumentTransport + ?Sized,
    C: DocumentCodec<T> + ?Sized,
{
    cursor: ScrollCursor<'r, X>,
    codec: &'r C,
    _marker: PhantomData<fn() -> T>,
}

impl<'r, T, X, C> SearchResults<'r, T, X, C>
where
    X: DocumentTransport + ?Sized,
    C: DocumentCodec<T> + ?Sized,
{
    /// Wraps a cursor.
    pub fn new(cursor: ScrollCursor<'r, X>, codec: &'r C) -> Self {
        Self {
            cursor,
            codec,
            _marker: PhantomData,
        }
    }

    /// Total hits as reported by the first page.
    pub fn total_hits(&self) -> TotalHits {
        self.cursor.total_hits()
    }

    /// Returns the underlying cursor.
    pub fn cursor(&mut self) -> &mut ScrollCursor<'r, X> {
        &mut self.cursor
    }

    /// Unwraps the cursor.
    pub fn into_cursor(self) -> ScrollCursor<'r, X> {
        self.cursor
    }

    /// Iterates over decoded documents.
    pub fn documents(self) -> impl Iterator<Item = ClientResult<T>> + 'r
    where
        T: 'r,
    {
        let codec = self.codec;
        self.cursor
            .map(move |hit| hit.and_then(|hit| codec.decode(&hit.source)))
    }

    /// Iterates over hits together with their decoded documents.
    pub fn hits(self) -> impl Iterator<Item = ClientResult<(SearchHit, T)>> + 'r
    where
        T: 'r,
    {
        let codec = self.codec;
        self.cursor.map(move |hit| {
            let hit = hit?;
            let document = codec.decode(&hit.source)?;
            Ok((hit, document))
        })
    }
}
