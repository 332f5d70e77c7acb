//! Stress helpers for docbulk.
//!
//! These helpers drive sessions and updates from many threads at once to
//! verify behavior under concurrent access.

use crate::fixtures::Note;
use docbulk_client::{
    BulkConfig, BulkStats, ClientResult, DocumentCodec, DocumentTransport, Repository,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of producer threads.
    pub producers: usize,
    /// Items appended by each producer.
    pub items_per_producer: usize,
    /// Session batch size.
    pub batch_size: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            producers: 4,
            items_per_producer: 250,
            batch_size: 32,
        }
    }
}

impl StressConfig {
    /// Returns the total number of items appended.
    pub fn total_items(&self) -> usize {
        self.producers * self.items_per_producer
    }
}

/// Returns the id written by `producer` for its `item`-th append.
pub fn producer_doc_id(producer: usize, item: usize) -> String {
    format!("p{producer}-{item:05}")
}

/// Indexes notes from several threads through one shared bulk session.
///
/// Every producer appends `items_per_producer` distinct documents; the
/// session is closed once all producers are done.
pub fn concurrent_bulk_index<X, C>(
    repo: &Repository<Note, X, C>,
    config: &StressConfig,
) -> ClientResult<(StressTestResult, BulkStats)>
where
    X: DocumentTransport,
    C: DocumentCodec<Note>,
{
    let session = repo.bulk_session(BulkConfig::new(config.batch_size));
    let rejected = AtomicUsize::new(0);
    let start = Instant::now();

    thread::scope(|scope| {
        for producer in 0..config.producers {
            let session = &session;
            let rejected = &rejected;
            scope.spawn(move || {
                for item in 0..config.items_per_producer {
                    let note = Note::new(format!("producer {producer} item {item}"));
                    let id = producer_doc_id(producer, item);
                    if session.index(Some(&id), &note, false).is_err() {
                        rejected.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }
    });

    let stats = session.close()?;
    let failed = stats.failed as usize + rejected.load(Ordering::Relaxed);
    let result = StressTestResult::new(stats.succeeded as usize, failed, start.elapsed());
    info!(
        producers = config.producers,
        batches = stats.batches,
        failed,
        ops_per_second = result.ops_per_second,
        "concurrent bulk index finished"
    );
    Ok((result, stats))
}

/// Increments the counter of note `id` from several threads at once.
///
/// Every update races the others; conflicts are absorbed by the
/// repository's retry configuration, so it needs a generous attempt budget
/// for all updates to land.
pub fn concurrent_increments<X, C>(
    repo: &Repository<Note, X, C>,
    id: &str,
    threads: usize,
    increments_per_thread: usize,
) -> StressTestResult
where
    X: DocumentTransport,
    C: DocumentCodec<Note>,
{
    let succeeded = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let start = Instant::now();

    thread::scope(|scope| {
        for _ in 0..threads {
            scope.spawn(|| {
                for _ in 0..increments_per_thread {
                    match repo.update(id, Note::incremented) {
                        Ok(_) => succeeded.fetch_add(1, Ordering::Relaxed),
                        Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            });
        }
    });

    let result = StressTestResult::new(
        succeeded.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    );
    info!(id, threads, failed = result.failed_ops, "concurrent increments finished");
    result
}
