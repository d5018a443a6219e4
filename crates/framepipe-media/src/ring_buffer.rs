//! Fixed-capacity circular queue with drop-oldest overflow.
//!
//! The queue never grows and never blocks: when it is full, enqueueing a new
//! item evicts the oldest one. Evicted and cleared items are dropped, so an
//! item type that returns a resource on `Drop` (such as
//! [`PoolEntry`](crate::buffer_pool::PoolEntry)) gets that resource back
//! into circulation automatically.
//!
//! # Thread Safety
//!
//! All operations take a single internal mutex. The intended use is one
//! writer context and one reader context sharing the queue behind an `Arc`.

use std::sync::{Mutex, MutexGuard, PoisonError};

use framepipe_common::{Error, Result};
use tracing::trace;

#[derive(Debug)]
struct RingState<T> {
    slots: Box<[Option<T>]>,
    /// Oldest queued item, `None` when the queue is empty.
    read_index: Option<usize>,
    /// Slot the next enqueued item lands in.
    write_index: usize,
    evicted: u64,
}

impl<T> RingState<T> {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn advance(&self, index: usize) -> usize {
        (index + 1) % self.capacity()
    }

    fn len(&self) -> usize {
        match self.read_index {
            None => 0,
            Some(read) if read < self.write_index => self.write_index - read,
            Some(read) => self.capacity() - read + self.write_index,
        }
    }

    fn is_full(&self) -> bool {
        self.read_index == Some(self.write_index)
    }

    /// Takes every queued item out of its slot, oldest first.
    fn take_all(&mut self) -> Vec<T> {
        let mut taken = Vec::with_capacity(self.len());
        if let Some(mut index) = self.read_index {
            for _ in 0..self.len() {
                taken.extend(self.slots[index].take());
                index = self.advance(index);
            }
        }
        taken
    }
}

/// Mutex-protected circular queue holding at most `capacity` items.
#[derive(Debug)]
pub struct RingBuffer<T> {
    state: Mutex<RingState<T>>,
}

impl<T> RingBuffer<T> {
    /// Creates an empty queue with room for `capacity` items.
    ///
    /// Returns [`Error::InvalidArgument`] when `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::invalid_argument("ring buffer capacity must be > 0"));
        }

        let slots = (0..capacity).map(|_| None).collect();
        Ok(Self {
            state: Mutex::new(RingState {
                slots,
                read_index: None,
                write_index: 0,
                evicted: 0,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, RingState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().read_index.is_none()
    }

    /// True when every slot holds an item, i.e. the next enqueue evicts.
    pub fn is_full(&self) -> bool {
        self.lock().is_full()
    }

    /// Total number of items dropped by overflow or [`clear_all_but_last`](Self::clear_all_but_last).
    pub fn evicted(&self) -> u64 {
        self.lock().evicted
    }

    /// Appends `item`, evicting the oldest item if the queue is full.
    ///
    /// Never fails. The evicted item is dropped after the lock is released.
    pub fn enqueue(&self, item: T) {
        let evicted = {
            let mut state = self.lock();
            let write = state.write_index;
            let evicted = state.slots[write].replace(item);

            match state.read_index {
                None => state.read_index = Some(write),
                Some(read) if read == write => {
                    state.read_index = Some(state.advance(read));
                    state.evicted += 1;
                }
                Some(_) => {}
            }
            state.write_index = state.advance(write);
            evicted
        };

        if evicted.is_some() {
            trace!("ring buffer full, dropped oldest item");
        }
    }

    /// Removes and returns the oldest item, or `None` when the queue is empty.
    pub fn try_dequeue(&self) -> Option<T> {
        let mut state = self.lock();
        let read = state.read_index?;
        let item = state.slots[read].take();

        let next = state.advance(read);
        state.read_index = if next == state.write_index {
            None
        } else {
            Some(next)
        };
        item
    }

    /// Drops every queued item and resets the queue to empty.
    ///
    /// Returns how many items were dropped.
    pub fn clear(&self) -> usize {
        let dropped = {
            let mut state = self.lock();
            let dropped = state.take_all();
            state.read_index = None;
            state.write_index = 0;
            dropped
        };
        dropped.len()
    }

    /// Drops every queued item except the most recently enqueued one.
    ///
    /// Used to relieve pressure while keeping the freshest frame. Does
    /// nothing on an empty queue.
    pub fn clear_all_but_last(&self) {
        let dropped = {
            let mut state = self.lock();
            if state.read_index.is_none() {
                return;
            }
            let capacity = state.capacity();
            let last = (state.write_index + capacity - 1) % capacity;
            let newest = state.slots[last].take();

            let dropped = state.take_all();
            state.evicted += dropped.len() as u64;
            state.slots[last] = newest;
            state.read_index = Some(last);
            dropped
        };

        if !dropped.is_empty() {
            trace!(count = dropped.len(), "ring buffer trimmed to newest item");
        }
    }
}
