//! Property-based test generators using proptest.
//!
//! Provides strategies for generating documents, batch shapes and
//! sequences of bulk write steps, plus a reference model that predicts
//! what the store should hold after the steps are applied.

use crate::fixtures::Note;
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Strategy for generating document ids.
pub fn doc_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z0-9][a-z0-9_-]{0,15}").expect("Invalid regex")
}

/// Strategy for generating note titles, including characters that need
/// escaping in JSON.
pub fn title_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9 \"\\\\/.,!?]{0,40}").expect("Invalid regex")
}

/// Strategy for generating notes.
pub fn note_strategy() -> impl Strategy<Value = Note> {
    (title_strategy(), 0u64..1_000).prop_map(|(title, count)| Note { title, count })
}

/// Shape of a bulk session run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    /// Items appended.
    pub items: usize,
    /// Session batch size.
    pub batch_size: usize,
}

impl BatchPlan {
    /// Returns the number of threshold flushes the plan triggers.
    pub fn full_batches(&self) -> usize {
        self.items / self.batch_size
    }

    /// Returns the expected batch sizes, including the remainder flushed
    /// on close.
    pub fn expected_batches(&self) -> Vec<usize> {
        let mut sizes = vec![self.batch_size; self.full_batches()];
        let remainder = self.items % self.batch_size;
        if remainder > 0 {
            sizes.push(remainder);
        }
        sizes
    }
}

/// Strategy for generating batch plans.
pub fn batch_plan_strategy() -> impl Strategy<Value = BatchPlan> {
    (0usize..120, 1usize..16).prop_map(|(items, batch_size)| BatchPlan { items, batch_size })
}

/// One write appended to a bulk session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteStep {
    /// Create or replace.
    Upsert {
        /// Document id.
        id: String,
        /// Document body.
        note: Note,
    },
    /// Create; fails if the id exists.
    Create {
        /// Document id.
        id: String,
        /// Document body.
        note: Note,
    },
    /// Delete; fails if the id is missing.
    Delete {
        /// Document id.
        id: String,
    },
}

/// Strategy for generating write steps over a small id pool, so that
/// creates collide and deletes miss often enough to matter.
pub fn write_steps_strategy(max_steps: usize) -> impl Strategy<Value = Vec<WriteStep>> {
    let id = (0u8..6).prop_map(|n| format!("doc-{n}"));
    let step = prop_oneof![
        3 => (id.clone(), note_strategy()).prop_map(|(id, note)| WriteStep::Upsert { id, note }),
        2 => (id.clone(), note_strategy()).prop_map(|(id, note)| WriteStep::Create { id, note }),
        1 => id.prop_map(|id| WriteStep::Delete { id }),
    ];
    prop::collection::vec(step, 0..max_steps)
}

/// Expected result of applying write steps in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelOutcome {
    /// Documents the store should hold.
    pub documents: BTreeMap<String, Note>,
    /// Steps expected to succeed.
    pub succeeded: usize,
    /// Steps expected to fail.
    pub failed: usize,
}

/// Applies write steps to an in-memory model of the store.
pub fn apply_to_model(steps: &[WriteStep]) -> ModelOutcome {
    let mut model = ModelOutcome::default();
    for step in steps {
        let applied = match step {
            WriteStep::Upsert { id, note } => {
                model.documents.insert(id.clone(), note.clone());
                true
            }
            WriteStep::Create { id, note } => {
                if model.documents.contains_key(id) {
                    false
                } else {
                    model.documents.insert(id.clone(), note.clone());
                    true
                }
            }
            WriteStep::Delete { id } => model.documents.remove(id).is_some(),
        };
        if applied {
            model.succeeded += 1;
        } else {
            model.failed += 1;
        }
    }
    model
}
