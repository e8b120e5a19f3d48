//! FIFO queue of pending requests, keyed on identity

use std::collections::VecDeque;
use std::sync::Arc;

/// Ordered, duplicate-free queue of shared entries
///
/// Membership compares `Arc` pointers, so two structurally equal requests are
/// distinct entries.
#[derive(Debug)]
pub struct RequestQueue<T> {
    entries: VecDeque<Arc<T>>,
}

impl<T> Default for RequestQueue<T> {
    fn default() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }
}

impl<T> RequestQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, item: &Arc<T>) -> bool {
        self.entries.iter().any(|entry| Arc::ptr_eq(entry, item))
    }

    /// Append unless already present; returns whether the item was added
    pub fn insert(&mut self, item: &Arc<T>) -> bool {
        if self.contains(item) {
            return false;
        }
        self.entries.push_back(Arc::clone(item));
        true
    }

    /// Remove the item if present; returns whether it was found
    pub fn remove(&mut self, item: &Arc<T>) -> bool {
        match self.entries.iter().position(|entry| Arc::ptr_eq(entry, item)) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Remove every entry, oldest first
    pub fn drain(&mut self) -> Vec<Arc<T>> {
        self.entries.drain(..).collect()
    }

    /// Up to `n` entries from the front, oldest first, without removing them
    pub fn front(&self, n: usize) -> Vec<Arc<T>> {
        self.entries.iter().take(n).cloned().collect()
    }
}
