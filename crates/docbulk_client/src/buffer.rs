//! Pending-item buffer shared by producers of a bulk session.

use parking_lot::Mutex;
use std::mem;
use thiserror::Error;

/// Returned by [`BatchBuffer::append`] once the buffer is sealed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("buffer is sealed")]
pub struct BufferSealed;

/// Thread-safe ordered buffer of pending items.
///
/// Appends and snapshots are linearized by one mutex: an append racing with
/// a snapshot lands either in the snapshot or in the fresh buffer, never
/// both and never neither.
#[derive(Debug)]
pub struct BatchBuffer<I> {
    state: Mutex<BufferState<I>>,
}

#[derive(Debug)]
struct BufferState<I> {
    items: Vec<I>,
    sealed: bool,
}

impl<I> BatchBuffer<I> {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates an empty buffer with room for `capacity` items.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(BufferState {
                items: Vec::with_capacity(capacity),
                sealed: false,
            }),
        }
    }

    /// Appends an item and returns the new pending count.
    pub fn append(&self, item: I) -> Result<usize, BufferSealed> {
        let mut state = self.state.lock();
        if state.sealed {
            return Err(BufferSealed);
        }
        state.items.push(item);
        Ok(state.items.len())
    }

    /// Takes every pending item, leaving the buffer empty.
    pub fn take_snapshot(&self) -> BatchSnapshot<I> {
        let mut state = self.state.lock();
        let capacity = state.items.capacity();
        BatchSnapshot {
            items: mem::replace(&mut state.items, Vec::with_capacity(capacity)),
        }
    }

    /// Seals the buffer and takes what is left. Later appends fail.
    pub fn seal(&self) -> BatchSnapshot<I> {
        let mut state = self.state.lock();
        state.sealed = true;
        BatchSnapshot {
            items: mem::take(&mut state.items),
        }
    }

    /// Returns true once [`seal`](Self::seal) has been called.
    pub fn is_sealed(&self) -> bool {
        self.state.lock().sealed
    }

    /// Returns the number of pending items.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<I> Default for BatchBuffer<I> {
    fn default() -> Self {
        Self::new()
    }
}

/// Items taken out of a [`BatchBuffer`], in append order.
#[derive(Debug)]
pub struct BatchSnapshot<I> {
    items: Vec<I>,
}

impl<I> BatchSnapshot<I> {
    /// Returns the number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterates over the items.
    pub fn iter(&self) -> std::slice::Iter<'_, I> {
        self.items.iter()
    }

    /// Returns the items.
    pub fn into_inner(self) -> Vec<I> {
        self.items
    }
}

impl<I> From<Vec<I>> for BatchSnapshot<I> {
    fn from(items: Vec<I>) -> Self {
        Self { items }
    }
}

impl<I> IntoIterator for BatchSnapshot<I> {
    type Item = I;
    type IntoIter = std::vec::IntoIter<I>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}
