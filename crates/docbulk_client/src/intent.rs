//! Buffered write intents.

use crate::report::{IntentKind, ItemReport};
use docbulk_protocol::{BulkAction, ConcurrencyToken};
use std::fmt;
use std::sync::Arc;

/// A pure function from the current document to its replacement.
pub type Transform<T> = Arc<dyn Fn(T) -> T + Send + Sync>;

/// Callback invoked once with the report of its item.
pub type ItemCallback = Box<dyn FnOnce(&ItemReport) + Send>;

/// A write waiting in a bulk session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteIntent {
    /// Create a document; `id: None` lets the store assign one.
    Create {
        /// Document id.
        id: Option<String>,
        /// Serialized document.
        payload: Vec<u8>,
    },
    /// Create or replace a document.
    Upsert {
        /// Document id.
        id: String,
        /// Serialized document.
        payload: Vec<u8>,
    },
    /// Replace a document, guarded by the version it was read at.
    ConditionalUpdate {
        /// Document id.
        id: String,
        /// Version the transform was applied to.
        token: ConcurrencyToken,
        /// Serialized `transform(original)`.
        payload: Vec<u8>,
    },
    /// Delete a document, optionally guarded.
    Delete {
        /// Document id.
        id: String,
        /// Required current version.
        token: Option<ConcurrencyToken>,
    },
}

impl WriteIntent {
    /// Returns the kind.
    pub fn kind(&self) -> IntentKind {
        match self {
            WriteIntent::Create { .. } => IntentKind::Create,
            WriteIntent::Upsert { .. } => IntentKind::Upsert,
            WriteIntent::ConditionalUpdate { .. } => IntentKind::ConditionalUpdate,
            WriteIntent::Delete { .. } => IntentKind::Delete,
        }
    }

    /// Returns the document id, if known before dispatch.
    pub fn id(&self) -> Option<&str> {
        match self {
            WriteIntent::Create { id, .. } => id.as_deref(),
            WriteIntent::Upsert { id, .. }
            | WriteIntent::ConditionalUpdate { id, .. }
            | WriteIntent::Delete { id, .. } => Some(id),
        }
    }

    /// Builds the bulk action for this intent.
    pub fn to_action(&self) -> BulkAction {
        match self {
            WriteIntent::Create { id, payload } => BulkAction::create(id.clone(), payload.clone()),
            WriteIntent::Upsert { id, payload } => BulkAction::index(id.as_str(), payload.clone()),
            WriteIntent::ConditionalUpdate { id, token, payload } => {
                BulkAction::conditional_index(id.as_str(), *token, payload.clone())
            }
            WriteIntent::Delete { id, token } => BulkAction::delete(id.as_str(), *token),
        }
    }
}

/// An intent plus what dispatch needs to route its outcome.
pub struct BulkItem<T> {
    /// The write.
    pub intent: WriteIntent,
    /// Retained for conflict retries of conditional updates.
    pub transform: Option<Transform<T>>,
    /// Fired once with the item's report.
    pub callback: Option<ItemCallback>,
}

impl<T> BulkItem<T> {
    /// Wraps an intent with no transform and no callback.
    pub fn new(intent: WriteIntent) -> Self {
        Self {
            intent,
            transform: None,
            callback: None,
        }
    }

    /// Retains a transform for conflict retries.
    pub fn with_transform(mut self, transform: Transform<T>) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Attaches a per-item callback.
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&ItemReport) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Fires the callback, if any.
    pub(crate) fn notify(&mut self, report: &ItemReport) {
        if let Some(callback) = self.callback.take() {
            callback(report);
        }
    }
}

impl<T> fmt::Debug for BulkItem<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkItem")
            .field("intent", &self.intent)
            .field("transform", &self.transform.is_some())
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docbulk_protocol::OpType;

    #[test]
    fn conditional_update_is_a_guarded_index() {
        let intent = WriteIntent::ConditionalUpdate {
            id: "a".into(),
            token: ConcurrencyToken::new(1, 5),
            payload: b"{}".to_vec(),
        };
        let action = intent.to_action();
        assert_eq!(action.op_type, OpType::Index);
        assert_eq!(action.token, Some(ConcurrencyToken::new(1, 5)));
        assert_eq!(intent.kind(), IntentKind::ConditionalUpdate);
    }

    #[test]
    fn id_less_create() {
        let intent = WriteIntent::Create {
            id: None,
            payload: b"{}".to_vec(),
        };
        assert_eq!(intent.id(), None);
        assert_eq!(intent.to_action().op_type, OpType::Create);
    }

    #[test]
    fn callback_fires_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let mut item = BulkItem::<()>::new(WriteIntent::Delete {
            id: "a".into(),
            token: None,
        })
        .with_callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let report = ItemReport {
            position: 0,
            kind: IntentKind::Delete,
            id: Some("a".into()),
            status: crate::report::ItemStatus::Succeeded { token: None },
        };
        item.notify(&report);
        item.notify(&report);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
