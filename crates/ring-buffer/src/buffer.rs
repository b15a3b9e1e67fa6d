//! Ring Buffer Implementation

use std::collections::VecDeque;

use crate::RingBufferError;

/// Fixed-capacity FIFO buffer
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    /// Entries, oldest at the front
    storage: VecDeque<T>,
    /// Capacity of the buffer
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Create a new ring buffer with given capacity
    pub fn new(capacity: usize) -> Result<Self, RingBufferError> {
        if capacity == 0 {
            return Err(RingBufferError::ZeroCapacity);
        }
        Ok(Self {
            storage: VecDeque::with_capacity(capacity),
            capacity,
        })
    }

    /// Append an entry, returning the evicted oldest one if the buffer was full
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.storage.len() >= self.capacity {
            self.storage.pop_front()
        } else {
            None
        };
        self.storage.push_back(item);
        evicted
    }

    /// Change the capacity. Shrinking drops the oldest entries.
    pub fn set_capacity(&mut self, capacity: usize) -> Result<(), RingBufferError> {
        if capacity == 0 {
            return Err(RingBufferError::ZeroCapacity);
        }
        while self.storage.len() > capacity {
            self.storage.pop_front();
        }
        self.capacity = capacity;
        Ok(())
    }

    /// Get the number of entries currently in the buffer
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Get the buffer capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every entry, keeping the capacity
    pub fn clear(&mut self) {
        self.storage.clear();
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Copy out all entries, oldest first
    pub fn to_vec(&self) -> Vec<T> {
        self.storage.iter().cloned().collect()
    }
}
