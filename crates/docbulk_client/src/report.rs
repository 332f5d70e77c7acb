//! Per-item reports and batch accounting.

use docbulk_protocol::{ConcurrencyToken, FailureCategory};

/// Kind of a buffered write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntentKind {
    /// Create; fails if the id exists.
    Create,
    /// Create or replace.
    Upsert,
    /// Replace guarded by a concurrency token.
    ConditionalUpdate,
    /// Delete, optionally guarded.
    Delete,
}

/// Final status of one dispatched item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemStatus {
    /// Applied by the batch.
    Succeeded {
        /// Version after the write, when reported.
        token: Option<ConcurrencyToken>,
    },
    /// Conflicted in the batch, then applied by a conflict retry.
    Retried {
        /// Conditional writes performed by the retry.
        attempts: u32,
        /// Version after the retry.
        token: ConcurrencyToken,
    },
    /// Not applied.
    Failed {
        /// Failure category.
        category: FailureCategory,
        /// Store or client message.
        message: String,
    },
}

impl ItemStatus {
    /// Returns true if the item ended up applied.
    pub fn is_success(&self) -> bool {
        !matches!(self, ItemStatus::Failed { .. })
    }
}

/// Report for one item of a flushed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReport {
    /// Position of the item within its batch.
    pub position: usize,
    /// Kind of write.
    pub kind: IntentKind,
    /// Document id, server assigned for id-less creates.
    pub id: Option<String>,
    /// Final status.
    pub status: ItemStatus,
}

/// Accounting for one flushed batch.
///
/// `succeeded + failed == reports.len()`; retried items count as succeeded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Items applied (directly or by retry).
    pub succeeded: usize,
    /// Items not applied.
    pub failed: usize,
    /// Items applied by a conflict retry.
    pub retried: usize,
    /// Per-item reports in batch order.
    pub reports: Vec<ItemReport>,
}

impl BatchOutcome {
    /// Creates an empty outcome sized for `items` reports.
    pub fn with_capacity(items: usize) -> Self {
        Self {
            reports: Vec::with_capacity(items),
            ..Self::default()
        }
    }

    /// Records an item report.
    pub fn record(&mut self, report: ItemReport) {
        match report.status {
            ItemStatus::Succeeded { .. } => self.succeeded += 1,
            ItemStatus::Retried { .. } => {
                self.succeeded += 1;
                self.retried += 1;
            }
            ItemStatus::Failed { .. } => self.failed += 1,
        }
        self.reports.push(report);
    }

    /// Returns the number of items in the batch.
    pub fn items(&self) -> usize {
        self.reports.len()
    }

    /// Returns true if every item was applied.
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }

    /// Iterates over failed reports.
    pub fn failures(&self) -> impl Iterator<Item = &ItemReport> {
        self.reports.iter().filter(|r| !r.status.is_success())
    }
}

/// Cumulative statistics of a bulk session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkStats {
    /// Batches dispatched.
    pub batches: u64,
    /// Items dispatched.
    pub items: u64,
    /// Items applied.
    pub succeeded: u64,
    /// Items not applied.
    pub failed: u64,
    /// Items applied by a conflict retry.
    pub retried: u64,
}

impl BulkStats {
    /// Adds a batch outcome.
    pub fn absorb(&mut self, outcome: &BatchOutcome) {
        self.batches += 1;
        self.items += outcome.items() as u64;
        self.succeeded += outcome.succeeded as u64;
        self.failed += outcome.failed as u64;
        self.retried += outcome.retried as u64;
    }
}
