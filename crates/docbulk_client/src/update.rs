//! Read-transform-write updates with optimistic concurrency.
//!
//! An update reads the current document and its version, applies a pure
//! transform and writes the result back guarded by that version. A version
//! conflict means someone else wrote in between; the loop then backs off
//! for a random delay and starts over from a fresh read, until the attempt
//! budget runs out.
//!
//! ```text
//! Start -> Read -> Apply -> Write -> Success
//!                             |
//!                          Conflict -> (attempt < max) -> backoff -> Read
//!                             |
//!                             +-----> (attempt == max) -> Exhausted
//! ```

use crate::async_transport::AsyncDocumentTransport;
use crate::codec::DocumentCodec;
use crate::config::RetryConfig;
use crate::error::{ClientError, ClientResult};
use crate::transport::{DocumentTransport, VersionedDocument, WriteAck, WriteRequest};
use docbulk_protocol::{ConcurrencyToken, RefreshPolicy};
use std::marker::PhantomData;
use std::time::Duration;
use tracing::{debug, warn};

/// What to do after a conflicting write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for `delay`, then read again.
    Retry {
        /// Write attempts made so far.
        attempt: u32,
        /// Backoff before the next read.
        delay: Duration,
    },
    /// Give up.
    Exhausted {
        /// Write attempts made.
        attempts: u32,
    },
}

/// Attempt bookkeeping for one update. Shared by the blocking and async
/// coordinators.
#[derive(Debug, Clone)]
pub struct RetryState {
    attempt: u32,
    max_attempts: u32,
    last_token: Option<ConcurrencyToken>,
}

impl RetryState {
    /// Creates a state allowing `max_attempts` writes (at least one).
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts: max_attempts.max(1),
            last_token: None,
        }
    }

    /// Records a write attempt against `token`.
    pub fn begin_write(&mut self, token: ConcurrencyToken) {
        self.attempt += 1;
        self.last_token = Some(token);
    }

    /// Decides what follows a conflicting write.
    pub fn on_conflict(&self, retry: &RetryConfig) -> RetryDecision {
        if self.attempt < self.max_attempts {
            RetryDecision::Retry {
                attempt: self.attempt,
                delay: retry.backoff(),
            }
        } else {
            RetryDecision::Exhausted {
                attempts: self.attempt,
            }
        }
    }

    /// Write attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Attempt budget.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Version the last write was guarded by.
    pub fn last_token(&self) -> Option<ConcurrencyToken> {
        self.last_token
    }
}

/// Result of a successful update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Acknowledgement of the winning write.
    pub ack: WriteAck,
    /// Write attempts it took.
    pub attempts: u32,
}

fn apply<T, C, F>(
    codec: &C,
    current: &VersionedDocument,
    transform: &F,
) -> ClientResult<Vec<u8>>
where
    C: DocumentCodec<T> + ?Sized,
    F: Fn(T) -> T + ?Sized,
{
    let value = codec.decode(&current.source)?;
    codec.encode(&transform(value))
}

fn log_success(index: &str, id: &str, state: &RetryState) {
    if state.attempts() > 1 {
        warn!(index, id, attempts = state.attempts(), "update succeeded after version conflicts");
    }
}

/// Runs conflict-retrying updates against a blocking transport.
pub struct UpdateCoordinator<'a, T, X: ?Sized, C: ?Sized> {
    transport: &'a X,
    codec: &'a C,
    index: &'a str,
    retry: RetryConfig,
    refresh: RefreshPolicy,
    _marker: PhantomData<fn(T) -> T>,
}

impl<'a, T, X, C> UpdateCoordinator<'a, T, X, C>
where
    X: DocumentTransport + ?Sized,
    C: DocumentCodec<T> + ?Sized,
{
    /// Creates a coordinator with the default retry configuration.
    pub fn new(transport: &'a X, codec: &'a C, index: &'a str) -> Self {
        Self {
            transport,
            codec,
            index,
            retry: RetryConfig::default(),
            refresh: RefreshPolicy::None,
            _marker: PhantomData,
        }
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the refresh policy of the conditional write.
    pub fn with_refresh(mut self, refresh: RefreshPolicy) -> Self {
        self.refresh = refresh;
        self
    }

    /// Replaces document `id` with `transform(current)`.
    ///
    /// Returns [`ClientError::NotFound`] if the document is missing and
    /// [`ClientError::UpdateExhausted`] once `max_attempts` conditional
    /// writes have conflicted. Other errors propagate immediately.
    pub fn update<F>(&self, id: &str, transform: F) -> ClientResult<UpdateOutcome>
    where
        F: Fn(T) -> T,
    {
        let mut state = RetryState::new(self.retry.max_attempts);
        loop {
            let current = self
                .transport
                .get(self.index, id)?
                .ok_or_else(|| ClientError::NotFound { id: id.to_string() })?;
            let payload = apply(self.codec, &current, &transform)?;

            state.begin_write(current.token);
            let request =
                WriteRequest::conditional(id, payload, current.token).with_refresh(self.refresh);
            match self.transport.write(self.index, &request) {
                Ok(ack) => {
                    log_success(self.index, id, &state);
                    return Ok(UpdateOutcome {
                        ack,
                        attempts: state.attempts(),
                    });
                }
                Err(e) if e.is_conflict() => match state.on_conflict(&self.retry) {
                    RetryDecision::Retry { attempt, delay } => {
                        debug!(index = self.index, id, attempt, ?delay, "version conflict, retrying update");
                        std::thread::sleep(delay);
                    }
                    RetryDecision::Exhausted { attempts } => {
                        return Err(ClientError::UpdateExhausted {
                            id: id.to_string(),
                            attempts,
                        });
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }
}

/// Async counterpart of [`UpdateCoordinator::update`].
///
/// Backoff sleeps on the tokio timer. Dropping the future cancels the loop;
/// at most one write is in flight at any time.
pub async fn update_async<T, X, C, F>(
    transport: &X,
    codec: &C,
    index: &str,
    id: &str,
    retry: &RetryConfig,
    refresh: RefreshPolicy,
    transform: F,
) -> ClientResult<UpdateOutcome>
where
    X: AsyncDocumentTransport + ?Sized,
    C: DocumentCodec<T> + ?Sized,
    F: Fn(T) -> T,
{
    let mut state = RetryState::new(retry.max_attempts);
    loop {
        let current = transport
            .get(index, id)
            .await?
            .ok_or_else(|| ClientError::NotFound { id: id.to_string() })?;
        let payload = apply(codec, &current, &transform)?;

        state.begin_write(current.token);
        let request = WriteRequest::conditional(id, payload, current.token).with_refresh(refresh);
        match transport.write(index, request).await {
            Ok(ack) => {
                log_success(index, id, &state);
                return Ok(UpdateOutcome {
                    ack,
                    attempts: state.attempts(),
                });
            }
            Err(e) if e.is_conflict() => match state.on_conflict(retry) {
                RetryDecision::Retry { attempt, delay } => {
                    debug!(index, id, attempt, ?delay, "version conflict, retrying update");
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::Exhausted { attempts } => {
                    return Err(ClientError::UpdateExhausted {
                        id: id.to_string(),
                        attempts,
                    });
                }
            },
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::async_transport::BlockingTransport;
    use crate::codec::JsonCodec;
    use crate::transport::MockTransport;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        n: i64,
    }

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig::new(max_attempts).with_backoff(Duration::ZERO, Duration::from_millis(2))
    }

    #[test]
    fn retry_state_bounds_attempts() {
        let retry = fast_retry(2);
        let mut state = RetryState::new(2);
        state.begin_write(ConcurrencyToken::new(1, 1));
        assert!(matches!(state.on_conflict(&retry), RetryDecision::Retry { attempt: 1, .. }));
        state.begin_write(ConcurrencyToken::new(1, 2));
        assert_eq!(
            state.on_conflict(&retry),
            RetryDecision::Exhausted { attempts: 2 }
        );
        assert_eq!(state.last_token(), Some(ConcurrencyToken::new(1, 2)));
    }

    #[test]
    fn zero_budget_means_one_attempt() {
        let state = RetryState::new(0);
        assert_eq!(state.max_attempts(), 1);
    }

    #[test]
    fn update_applies_transform_to_current_value() {
        let transport = MockTransport::new();
        transport.put_document("c", br#"{"n":41}"#);
        let codec = JsonCodec::<Counter>::new();

        let outcome = UpdateCoordinator::new(&transport, &codec, "counters")
            .with_retry(fast_retry(2))
            .update("c", |c| Counter { n: c.n + 1 })
            .unwrap();

        assert_eq!(outcome.attempts, 1);
        assert_eq!(transport.document("c").unwrap().source, br#"{"n":42}"#.to_vec());
    }

    #[test]
    fn conflict_then_success() {
        let transport = MockTransport::new();
        transport.put_document("c", br#"{"n":1}"#);
        transport.force_conflicts(1);
        let codec = JsonCodec::<Counter>::new();

        let outcome = UpdateCoordinator::new(&transport, &codec, "counters")
            .with_retry(fast_retry(3))
            .update("c", |c| Counter { n: c.n * 10 })
            .unwrap();

        assert_eq!(outcome.attempts, 2);
        assert_eq!(transport.writes(), 2);
        assert_eq!(transport.document("c").unwrap().source, br#"{"n":10}"#.to_vec());
    }

    #[test]
    fn always_conflicting_update_stops_at_budget() {
        let transport = MockTransport::new();
        transport.put_document("c", br#"{"n":1}"#);
        transport.force_conflicts(u32::MAX);
        let codec = JsonCodec::<Counter>::new();

        let err = UpdateCoordinator::new(&transport, &codec, "counters")
            .with_retry(fast_retry(3))
            .update("c", |c| c)
            .unwrap_err();

        assert!(matches!(err, ClientError::UpdateExhausted { ref id, attempts: 3 } if id == "c"));
        assert_eq!(transport.writes(), 3);
    }

    #[test]
    fn missing_document_is_not_found() {
        let transport = MockTransport::new();
        let codec = JsonCodec::<Counter>::new();
        let err = UpdateCoordinator::new(&transport, &codec, "counters")
            .update("nope", |c| c)
            .unwrap_err();
        assert!(matches!(err, ClientError::NotFound { .. }));
        assert_eq!(transport.writes(), 0);
    }

    #[test]
    fn decode_failure_propagates_without_writing() {
        let transport = MockTransport::new();
        transport.put_document("c", br#"{"n":"not a number"}"#);
        let codec = JsonCodec::<Counter>::new();
        let err = UpdateCoordinator::new(&transport, &codec, "counters")
            .update("c", |c| c)
            .unwrap_err();
        assert!(matches!(err, ClientError::Codec(_)));
        assert_eq!(transport.writes(), 0);
    }

    #[tokio::test]
    async fn async_update_retries_conflicts() {
        let transport = BlockingTransport::new(MockTransport::new());
        transport.inner().put_document("c", br#"{"n":5}"#);
        transport.inner().force_conflicts(1);
        let codec = JsonCodec::<Counter>::new();

        let outcome = update_async(
            &transport,
            &codec,
            "counters",
            "c",
            &fast_retry(2),
            RefreshPolicy::None,
            |c: Counter| Counter { n: c.n - 1 },
        )
        .await
        .unwrap();

        assert_eq!(outcome.attempts, 2);
        assert_eq!(
            transport.inner().document("c").unwrap().source,
            br#"{"n":4}"#.to_vec()
        );
    }

    #[tokio::test]
    async fn async_update_exhausts() {
        let transport = BlockingTransport::new(MockTransport::new());
        transport.inner().put_document("c", br#"{"n":5}"#);
        transport.inner().force_conflicts(u32::MAX);
        let codec = JsonCodec::<Counter>::new();

        let err = update_async(
            &transport,
            &codec,
            "counters",
            "c",
            &fast_retry(2),
            RefreshPolicy::None,
            |c: Counter| c,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ClientError::UpdateExhausted { attempts: 2, .. }));
        assert_eq!(transport.inner().writes(), 2);
    }

    #[tokio::test]
    async fn dropping_async_update_stops_the_retry_loop() {
        let transport = BlockingTransport::new(MockTransport::new());
        transport.inner().put_document("c", br#"{"n":5}"#);
        transport.inner().force_conflicts(u32::MAX);
        let codec = JsonCodec::<Counter>::new();
        let slow = RetryConfig::new(u32::MAX)
            .with_backoff(Duration::from_secs(10), Duration::from_secs(10));

        let result = tokio::time::timeout(
            Duration::from_millis(200),
            update_async(
                &transport,
                &codec,
                "counters",
                "c",
                &slow,
                RefreshPolicy::None,
                |c: Counter| c,
            ),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(transport.inner().writes(), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.inner().writes(), 1);
        assert_eq!(
            transport.inner().document("c").unwrap().source,
            br#"{"n":5}"#.to_vec()
        );
    }
}
