//! In-memory ordered buffer with duplicate suppression and an optional size limit.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::core::{Admission, QueueError};

/// Collaborator-supplied ordering. Items comparing `Less` are drained first.
pub type Comparator<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// Non-synchronized priority storage backing a [`PriorityWorkQueue`](crate::core::PriorityWorkQueue).
///
/// Items are kept sorted by the comparator, smallest first. Items that compare
/// equal keep insertion order, and without a comparator the buffer is plain FIFO.
/// Insertion is O(n) because both the duplicate scan and the ordered insert walk
/// the buffer.
pub struct OrderedBuffer<T> {
    items: VecDeque<T>,
    max_size: Option<usize>,
    comparator: Option<Comparator<T>>,
}

impl<T> OrderedBuffer<T> {
    /// Create an empty buffer.
    pub fn new(max_size: Option<usize>, comparator: Option<Comparator<T>>) -> Self {
        Self {
            items: VecDeque::with_capacity(max_size.unwrap_or(16).min(1024)),
            max_size,
            comparator,
        }
    }

    /// Remove the next item in priority order.
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Remove up to `max` items in priority order.
    pub fn drain_up_to(&mut self, max: usize) -> Vec<T> {
        let count = max.min(self.items.len());
        self.items.drain(..count).collect()
    }

    /// Remove every item in priority order.
    pub fn drain_all(&mut self) -> Vec<T> {
        self.items.drain(..).collect()
    }

    /// Configured size limit, if any.
    pub const fn max_size(&self) -> Option<usize> {
        self.max_size
    }

    /// Current number of held items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: PartialEq> OrderedBuffer<T> {
    /// Admit an item, honoring duplicate suppression and the size limit.
    ///
    /// # Errors
    ///
    /// Hands the item back with [`QueueError::CapacityExceeded`] when the
    /// buffer is full.
    pub fn push(&mut self, item: T) -> Result<Admission, (T, QueueError)> {
        if self.contains(&item) {
            return Ok(Admission::Duplicate);
        }
        if let Some(max_size) = self.max_size {
            if self.items.len() >= max_size {
                return Err((item, QueueError::CapacityExceeded { max_size }));
            }
        }
        self.insert(item);
        Ok(Admission::Queued)
    }

    /// Admit an item regardless of the size limit. Duplicates are still dropped.
    pub fn force_push(&mut self, item: T) -> Admission {
        if self.contains(&item) {
            return Admission::Duplicate;
        }
        self.insert(item);
        Admission::Queued
    }

    /// Whether an equal item is currently held.
    pub fn contains(&self, item: &T) -> bool {
        self.items.iter().any(|held| held == item)
    }

    fn insert(&mut self, item: T) {
        match &self.comparator {
            Some(cmp) => {
                // after every held item that does not sort after the new one
                let idx = self
                    .items
                    .partition_point(|held| cmp(held, &item) != Ordering::Greater);
                self.items.insert(idx, item);
            }
            None => self.items.push_back(item),
        }
    }
}
