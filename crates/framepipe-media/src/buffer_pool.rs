//! Fixed pool of equally sized byte buffers for frame capture pipelines.
//!
//! The pool hands out at most `capacity` buffers at a time and never
//! allocates on the hot path. A checked-out buffer is wrapped in a
//! [`PoolEntry`]; dropping or disposing the entry gives the buffer back.
//!
//! Available slots are tracked with a free-list ring of slot indices. The
//! ring uses the same read/write index scheme as
//! [`RingBuffer`](crate::ring_buffer::RingBuffer), with `None` as the
//! "nothing available" sentinel.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use framepipe_common::{Error, Result};
use serde::Serialize;
use tracing::{debug, trace};

/// Snapshot of pool usage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BufferPoolStats {
    pub capacity: usize,
    pub buffer_size: usize,
    pub available: usize,
    pub checked_out: usize,
    /// Successful `try_get` calls.
    pub checkouts: u64,
    /// Entries that made it back into the free ring.
    pub returns: u64,
    /// `try_get` calls that found every slot checked out.
    pub exhausted: u64,
    pub reallocations: u64,
}

#[derive(Debug)]
struct PoolState {
    /// Buffer for each physical slot; `None` while the slot is checked out.
    slots: Vec<Option<Box<[u8]>>>,
    /// Free-list ring of available slot indices.
    free: Box<[usize]>,
    read_index: Option<usize>,
    write_index: usize,
    buffer_size: usize,
    /// Bumped on every reallocation. Entries from an older generation are
    /// not taken back.
    generation: u64,
    checkouts: u64,
    returns: u64,
    exhausted: u64,
    reallocations: u64,
}

impl PoolState {
    fn new(capacity: usize, buffer_size: usize) -> Self {
        Self {
            slots: allocate_slots(capacity, buffer_size),
            free: (0..capacity).collect(),
            read_index: Some(0),
            write_index: 0,
            buffer_size,
            generation: 0,
            checkouts: 0,
            returns: 0,
            exhausted: 0,
            reallocations: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.free.len()
    }

    fn advance(&self, index: usize) -> usize {
        (index + 1) % self.capacity()
    }

    fn available(&self) -> usize {
        match self.read_index {
            None => 0,
            Some(read) if read < self.write_index => self.write_index - read,
            Some(read) => self.capacity() - read + self.write_index,
        }
    }

    /// Replaces every slot with a fresh buffer of `buffer_size` bytes and
    /// marks all of them available. Returns the old buffers so the caller
    /// can free them outside the lock.
    fn reallocate(&mut self, buffer_size: usize) -> Vec<Option<Box<[u8]>>> {
        let capacity = self.capacity();
        let old = std::mem::replace(&mut self.slots, allocate_slots(capacity, buffer_size));
        for (index, slot) in self.free.iter_mut().enumerate() {
            *slot = index;
        }
        self.read_index = Some(0);
        self.write_index = 0;
        self.buffer_size = buffer_size;
        self.generation += 1;
        self.reallocations += 1;
        old
    }

    fn pop_free(&mut self) -> Option<(usize, Box<[u8]>)> {
        let Some(read) = self.read_index else {
            self.exhausted += 1;
            return None;
        };
        let slot = self.free[read];
        let buffer = self.slots[slot].take()?;

        let next = self.advance(read);
        self.read_index = if next == self.write_index {
            None
        } else {
            Some(next)
        };
        self.checkouts += 1;
        Some((slot, buffer))
    }

    fn push_free(&mut self, slot: usize, buffer: Box<[u8]>) {
        let write = self.write_index;
        self.slots[slot] = Some(buffer);
        self.free[write] = slot;
        if self.read_index.is_none() {
            self.read_index = Some(write);
        }
        self.write_index = self.advance(write);
        self.returns += 1;
    }
}

fn allocate_slots(capacity: usize, buffer_size: usize) -> Vec<Option<Box<[u8]>>> {
    (0..capacity)
        .map(|_| Some(vec![0u8; buffer_size].into_boxed_slice()))
        .collect()
}

#[derive(Debug)]
struct PoolShared {
    state: Mutex<PoolState>,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, slot: usize, generation: u64, buffer: Box<[u8]>) {
        let mut state = self.lock();
        if state.generation != generation {
            drop(state);
            trace!(slot, generation, "discarding entry from a previous pool generation");
            return;
        }
        state.push_free(slot, buffer);
    }
}

/// Fixed-capacity pool of reusable byte buffers.
///
/// Cloning the pool yields another handle to the same slots.
#[derive(Debug, Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    /// Allocates `capacity` zeroed buffers of `buffer_size` bytes, all available.
    pub fn new(capacity: usize, buffer_size: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::invalid_argument("buffer pool capacity must be > 0"));
        }
        if buffer_size == 0 {
            return Err(Error::invalid_argument("buffer pool buffer size must be > 0"));
        }

        Ok(Self {
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState::new(capacity, buffer_size)),
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.shared.lock().capacity()
    }

    pub fn buffer_size(&self) -> usize {
        self.shared.lock().buffer_size
    }

    /// Number of buffers ready to be checked out.
    pub fn available(&self) -> usize {
        self.shared.lock().available()
    }

    /// Number of buffers currently lent out.
    pub fn checked_out(&self) -> usize {
        let state = self.shared.lock();
        state.capacity() - state.available()
    }

    /// Bytes owned by the pool, whether checked out or not.
    pub fn memory_usage_bytes(&self) -> usize {
        let state = self.shared.lock();
        state.capacity() * state.buffer_size
    }

    pub fn stats(&self) -> BufferPoolStats {
        let state = self.shared.lock();
        let available = state.available();
        BufferPoolStats {
            capacity: state.capacity(),
            buffer_size: state.buffer_size,
            available,
            checked_out: state.capacity() - available,
            checkouts: state.checkouts,
            returns: state.returns,
            exhausted: state.exhausted,
            reallocations: state.reallocations,
        }
    }

    /// Checks out a buffer, or returns `None` when every slot is lent out.
    ///
    /// Exhaustion is the normal backpressure signal; the caller decides
    /// whether to drop the frame or retry on the next tick.
    pub fn try_get(&self) -> Option<PoolEntry> {
        let (slot, buffer, generation) = {
            let mut state = self.shared.lock();
            let (slot, buffer) = state.pop_free()?;
            (slot, buffer, state.generation)
        };

        Some(PoolEntry {
            slot,
            generation,
            buffer,
            checked_out: true,
            pool: Arc::downgrade(&self.shared),
        })
    }

    /// Changes the size of every buffer, reallocating all slots.
    ///
    /// Does nothing when `buffer_size` matches the current size. Entries
    /// checked out before the resize keep their old buffer and are not taken
    /// back; callers should return everything before resizing.
    pub fn set_buffer_size(&self, buffer_size: usize) -> Result<()> {
        if buffer_size == 0 {
            return Err(Error::invalid_argument("buffer pool buffer size must be > 0"));
        }

        let old = {
            let mut state = self.shared.lock();
            if state.buffer_size == buffer_size {
                return Ok(());
            }
            debug!(
                from = state.buffer_size,
                to = buffer_size,
                capacity = state.capacity(),
                "reallocating buffer pool"
            );
            state.reallocate(buffer_size)
        };
        drop(old);
        Ok(())
    }

    /// Reallocates every slot at the current size and marks all available.
    pub fn restore(&self) {
        let old = {
            let mut state = self.shared.lock();
            debug!(
                capacity = state.capacity(),
                checked_out = state.capacity() - state.available(),
                "restoring buffer pool"
            );
            let buffer_size = state.buffer_size;
            state.reallocate(buffer_size)
        };
        drop(old);
    }
}

/// A buffer checked out from a [`BufferPool`].
///
/// The entry holds the buffer exclusively until it is disposed or dropped,
/// at which point the buffer goes back to the pool. Disposing twice is a
/// no-op. The back-reference to the pool is weak, so an entry that outlives
/// its pool simply frees its buffer.
pub struct PoolEntry {
    slot: usize,
    generation: u64,
    buffer: Box<[u8]>,
    checked_out: bool,
    pool: Weak<PoolShared>,
}

impl PoolEntry {
    /// Index of the physical slot this buffer belongs to.
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn is_checked_out(&self) -> bool {
        self.checked_out
    }

    /// Buffer length in bytes. Zero once the entry has been disposed.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// Copies `len` bytes from `src[src_offset..]` into the buffer at
    /// `dest_offset`.
    pub fn write_data(
        &mut self,
        src: &[u8],
        src_offset: usize,
        dest_offset: usize,
        len: usize,
    ) -> Result<()> {
        let src_end = src_offset
            .checked_add(len)
            .filter(|&end| end <= src.len())
            .ok_or_else(|| {
                Error::invalid_argument(format!(
                    "source range {src_offset}+{len} exceeds {} bytes",
                    src.len()
                ))
            })?;
        let dest_end = dest_offset
            .checked_add(len)
            .filter(|&end| end <= self.buffer.len())
            .ok_or_else(|| {
                Error::invalid_argument(format!(
                    "destination range {dest_offset}+{len} exceeds {} bytes",
                    self.buffer.len()
                ))
            })?;

        self.buffer[dest_offset..dest_end].copy_from_slice(&src[src_offset..src_end]);
        Ok(())
    }

    /// Returns the buffer to its pool. Later calls do nothing.
    pub fn dispose(&mut self) {
        if !self.checked_out {
            return;
        }
        self.checked_out = false;

        let buffer = std::mem::take(&mut self.buffer);
        if let Some(pool) = self.pool.upgrade() {
            pool.release(self.slot, self.generation, buffer);
        }
    }
}

impl Drop for PoolEntry {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for PoolEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolEntry")
            .field("slot", &self.slot)
            .field("generation", &self.generation)
            .field("len", &self.buffer.len())
            .field("checked_out", &self.checked_out)
            .finish()
    }
}
