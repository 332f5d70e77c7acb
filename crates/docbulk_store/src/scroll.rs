//! Scroll contexts.
//!
//! A scroll freezes the result set of a search when it is opened. Each
//! context holds the hits not yet returned and a lease; every advance
//! renews the lease with the TTL it carries. Contexts whose lease ran out
//! are purged lazily on the next registry access.

use crate::error::{StoreError, StoreResult};
use docbulk_protocol::{HitsEnvelope, RawHit, SearchResponse, TotalHits};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, trace};
use uuid::Uuid;

#[derive(Debug)]
struct ScrollContext {
    remaining: VecDeque<RawHit>,
    total: TotalHits,
    page_size: usize,
    expires_at: Instant,
}

impl ScrollContext {
    fn next_page(&mut self) -> Vec<RawHit> {
        let take = self.page_size.min(self.remaining.len());
        self.remaining.drain(..take).collect()
    }
}

/// Registry of open scroll contexts.
pub struct ScrollRegistry {
    contexts: Mutex<HashMap<String, ScrollContext>>,
}

impl ScrollRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            contexts: Mutex::new(HashMap::new()),
        }
    }

    /// Opens a scroll over `hits` and returns its first page.
    pub fn open(&self, hits: Vec<RawHit>, page_size: u32, ttl: Duration) -> SearchResponse {
        let total = TotalHits::exact(hits.len() as u64);
        let mut context = ScrollContext {
            remaining: hits.into(),
            total,
            page_size: page_size as usize,
            expires_at: Instant::now() + ttl,
        };
        let first = context.next_page();
        let scroll_id = Uuid::new_v4().to_string();

        let mut contexts = self.contexts.lock();
        purge_expired(&mut contexts);
        debug!(scroll_id = %scroll_id, total = total.value, "opened scroll context");
        contexts.insert(scroll_id.clone(), context);

        SearchResponse {
            scroll_id: Some(scroll_id),
            took: 0,
            hits: HitsEnvelope { total, hits: first },
        }
    }

    /// Returns the next page of a scroll and renews its lease.
    ///
    /// An exhausted scroll keeps answering with empty pages until it is
    /// cleared or expires.
    pub fn advance(&self, scroll_id: &str, ttl: Duration) -> StoreResult<SearchResponse> {
        let mut contexts = self.contexts.lock();
        purge_expired(&mut contexts);
        let context = contexts
            .get_mut(scroll_id)
            .ok_or_else(|| StoreError::ScrollMissing(scroll_id.to_string()))?;

        context.expires_at = Instant::now() + ttl;
        let hits = context.next_page();
        trace!(scroll_id, returned = hits.len(), left = context.remaining.len(), "advanced scroll");

        Ok(SearchResponse {
            scroll_id: Some(scroll_id.to_string()),
            took: 0,
            hits: HitsEnvelope {
                total: context.total,
                hits,
            },
        })
    }

    /// Releases scroll contexts and returns how many were open.
    pub fn clear<'a>(&self, scroll_ids: impl IntoIterator<Item = &'a str>) -> u32 {
        let mut contexts = self.contexts.lock();
        purge_expired(&mut contexts);
        let mut freed = 0;
        for scroll_id in scroll_ids {
            if contexts.remove(scroll_id).is_some() {
                debug!(scroll_id, "released scroll context");
                freed += 1;
            }
        }
        freed
    }

    /// Returns the number of live scroll contexts.
    pub fn open_scrolls(&self) -> usize {
        let mut contexts = self.contexts.lock();
        purge_expired(&mut contexts);
        contexts.len()
    }
}

impl Default for ScrollRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn purge_expired(contexts: &mut HashMap<String, ScrollContext>) {
    let now = Instant::now();
    contexts.retain(|scroll_id, context| {
        let live = context.expires_at > now;
        if !live {
            debug!(scroll_id = %scroll_id, "scroll context expired");
        }
        live
    });
}
