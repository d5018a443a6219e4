//! Producer to consumer frame handoff built from a [`BufferPool`] and a
//! [`RingBuffer`] of checked-out entries.
//!
//! A producer checks out a buffer, fills it and publishes it. The consumer
//! takes the oldest published frame on its tick, reads it, and drops the
//! entry, which hands the buffer back to the pool. Memory use is bounded by
//! the pool; nothing on either side blocks.
//!
//! ```text
//!  producer                  FrameQueue                     consumer
//!  checkout() ──▶ BufferPool ──▶ fill ──▶ publish() ──▶ RingBuffer ──▶ try_next()
//!      ▲                                                                  │
//!      └──────────────────────── drop(PoolEntry) ◀────────────────────────┘
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use framepipe_common::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::buffer_pool::{BufferPool, BufferPoolStats, PoolEntry};
use crate::ring_buffer::RingBuffer;

/// Sizing for a [`FrameQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameQueueConfig {
    /// Number of frame buffers (e.g., 3 for triple-buffering)
    pub pool_capacity: usize,

    /// Maximum number of published frames waiting for the consumer
    pub ring_capacity: usize,

    /// Size of each frame buffer in bytes (e.g., 1920 * 1080 * 4 for RGBA)
    pub buffer_size: usize,
}

impl Default for FrameQueueConfig {
    fn default() -> Self {
        Self {
            pool_capacity: 3,
            ring_capacity: 3,
            buffer_size: 1920 * 1080 * 4, // 1080p RGBA
        }
    }
}

impl FrameQueueConfig {
    pub fn validate(&self) -> Result<()> {
        if self.pool_capacity == 0 {
            return Err(Error::invalid_argument("pool_capacity must be > 0"));
        }
        if self.ring_capacity == 0 {
            return Err(Error::invalid_argument("ring_capacity must be > 0"));
        }
        if self.buffer_size == 0 {
            return Err(Error::invalid_argument("buffer_size must be > 0"));
        }
        Ok(())
    }
}

/// Result of [`FrameQueue::try_publish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    /// No buffer was free even after trimming the queue; the frame was not kept.
    Dropped,
}

/// Statistics about frame flow through the queue.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FrameQueueStats {
    pub published: u64,
    pub consumed: u64,
    /// Frames the producer could not get a buffer for.
    pub dropped: u64,
    /// Queued frames discarded before the consumer saw them: overflow,
    /// trimming, stale frames pushed out by the producer, `clear` and resizes.
    pub evicted: u64,
    /// Times the producer trimmed the queue to free a buffer.
    pub pressure_reliefs: u64,
    pub queued: usize,
    pub pool: BufferPoolStats,
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    consumed: AtomicU64,
    dropped: AtomicU64,
    pressure_reliefs: AtomicU64,
    /// Queued frames removed by the queue itself rather than by the ring.
    discarded: AtomicU64,
}

/// Bounded, non-blocking frame handoff between one producer and one consumer.
///
/// Clones share the same pool and queue.
#[derive(Debug, Clone)]
pub struct FrameQueue {
    pool: BufferPool,
    ring: Arc<RingBuffer<PoolEntry>>,
    counters: Arc<Counters>,
}

impl FrameQueue {
    pub fn new(config: FrameQueueConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            pool: BufferPool::new(config.pool_capacity, config.buffer_size)?,
            ring: Arc::new(RingBuffer::new(config.ring_capacity)?),
            counters: Arc::new(Counters::default()),
        })
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn buffer_size(&self) -> usize {
        self.pool.buffer_size()
    }

    /// Number of published frames not yet taken by the consumer.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Checks out a buffer for the producer to fill.
    ///
    /// When the pool is exhausted and frames are still queued, every queued
    /// frame but the newest is dropped to free buffers. If that frees
    /// nothing, the newest queued frame goes too, since the frame about to be
    /// written is fresher. The checkout is always retried after the pool
    /// first comes up empty. Returns `None` only if the pool is still
    /// exhausted, which means the consumer is holding every buffer; the frame
    /// should be skipped.
    pub fn checkout(&self) -> Option<PoolEntry> {
        if let Some(entry) = self.pool.try_get() {
            return Some(entry);
        }

        if !self.ring.is_empty() {
            self.ring.clear_all_but_last();
            self.counters.pressure_reliefs.fetch_add(1, Ordering::Relaxed);
            debug!("frame pool exhausted, trimmed queue to newest frame");

            if let Some(entry) = self.pool.try_get() {
                return Some(entry);
            }
            if let Some(stale) = self.ring.try_dequeue() {
                drop(stale);
                self.counters.discarded.fetch_add(1, Ordering::Relaxed);
                debug!("frame pool exhausted, replacing last queued frame");
            }
        }

        // The consumer may have returned a buffer since the first attempt.
        if let Some(entry) = self.pool.try_get() {
            return Some(entry);
        }

        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        debug!("frame pool exhausted, dropping frame");
        None
    }

    /// Queues a filled entry for the consumer.
    pub fn publish(&self, entry: PoolEntry) {
        self.ring.enqueue(entry);
        self.counters.published.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies `frame` into a pooled buffer and publishes it.
    ///
    /// Returns [`Error::InvalidArgument`] when `frame` is larger than the
    /// buffer size, and [`PublishOutcome::Dropped`] when no buffer is free.
    pub fn try_publish(&self, frame: &[u8]) -> Result<PublishOutcome> {
        let buffer_size = self.pool.buffer_size();
        if frame.len() > buffer_size {
            return Err(Error::invalid_argument(format!(
                "frame of {} bytes exceeds buffer size {buffer_size}",
                frame.len()
            )));
        }

        let Some(mut entry) = self.checkout() else {
            return Ok(PublishOutcome::Dropped);
        };
        entry.write_data(frame, 0, 0, frame.len())?;
        self.publish(entry);
        Ok(PublishOutcome::Published)
    }

    /// Takes the oldest published frame. Drop the entry when done with it.
    pub fn try_next(&self) -> Option<PoolEntry> {
        let entry = self.ring.try_dequeue()?;
        self.counters.consumed.fetch_add(1, Ordering::Relaxed);
        Some(entry)
    }

    /// Discards everything but the newest frame and takes it.
    pub fn drain_latest(&self) -> Option<PoolEntry> {
        self.ring.clear_all_but_last();
        self.try_next()
    }

    /// Drops every queued frame, returning their buffers.
    pub fn clear(&self) {
        self.discard_queued();
    }

    fn discard_queued(&self) {
        let cleared = self.ring.clear();
        self.counters
            .discarded
            .fetch_add(cleared as u64, Ordering::Relaxed);
    }

    /// Drops queued frames and reallocates the pool at `buffer_size`.
    pub fn set_buffer_size(&self, buffer_size: usize) -> Result<()> {
        if buffer_size == 0 {
            return Err(Error::invalid_argument("buffer_size must be > 0"));
        }
        self.discard_queued();
        self.pool.set_buffer_size(buffer_size)
    }

    pub fn stats(&self) -> FrameQueueStats {
        FrameQueueStats {
            published: self.counters.published.load(Ordering::Relaxed),
            consumed: self.counters.consumed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            evicted: self.ring.evicted() + self.counters.discarded.load(Ordering::Relaxed),
            pressure_reliefs: self.counters.pressure_reliefs.load(Ordering::Relaxed),
            queued: self.ring.len(),
            pool: self.pool.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(pool_capacity: usize, ring_capacity: usize) -> FrameQueue {
        FrameQueue::new(FrameQueueConfig {
            pool_capacity,
            ring_capacity,
            buffer_size: 16,
        })
        .unwrap()
    }

    #[test]
    fn test_config_validation() {
        assert!(FrameQueueConfig::default().validate().is_ok());

        for config in [
            FrameQueueConfig {
                pool_capacity: 0,
                ..Default::default()
            },
            FrameQueueConfig {
                ring_capacity: 0,
                ..Default::default()
            },
            FrameQueueConfig {
                buffer_size: 0,
                ..Default::default()
            },
        ] {
            assert!(FrameQueue::new(config).unwrap_err().is_invalid_argument());
        }
    }

    #[test]
    fn test_config_json() {
        let config: FrameQueueConfig =
            serde_json::from_str(r#"{"pool_capacity":4,"ring_capacity":2,"buffer_size":64}"#)
                .unwrap();
        assert_eq!(config.pool_capacity, 4);
        assert_eq!(config.ring_capacity, 2);
        assert_eq!(config.buffer_size, 64);
    }

    #[test]
    fn test_publish_and_consume() {
        let q = queue(2, 2);
        assert_eq!(q.try_publish(b"hello").unwrap(), PublishOutcome::Published);
        assert_eq!(q.len(), 1);

        let frame = q.try_next().unwrap();
        assert_eq!(&frame.data()[..5], b"hello");
        assert_eq!(frame.len(), 16);
        assert_eq!(q.pool().available(), 1);

        drop(frame);
        assert_eq!(q.pool().available(), 2);
        assert!(q.try_next().is_none());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let q = queue(1, 1);
        let err = q.try_publish(&[0u8; 17]).unwrap_err();
        assert!(err.is_invalid_argument());
        assert_eq!(q.pool().available(), 1);
    }

    #[test]
    fn test_ring_overflow_returns_buffers() {
        let q = queue(4, 2);
        for i in 0..4u8 {
            assert_eq!(q.try_publish(&[i]).unwrap(), PublishOutcome::Published);
        }

        assert_eq!(q.len(), 2);
        assert_eq!(q.pool().available(), 2);
        assert_eq!(q.stats().evicted, 2);
        assert_eq!(q.try_next().unwrap().data()[0], 2);
        assert_eq!(q.try_next().unwrap().data()[0], 3);
    }

    #[test]
    fn test_exhausted_pool_trims_to_newest() {
        let q = queue(3, 3);
        for i in 0..3u8 {
            q.try_publish(&[i]).unwrap();
        }
        assert_eq!(q.pool().available(), 0);

        assert_eq!(q.try_publish(&[3]).unwrap(), PublishOutcome::Published);
        let stats = q.stats();
        assert_eq!(stats.pressure_reliefs, 1);
        assert_eq!(stats.dropped, 0);

        assert_eq!(q.try_next().unwrap().data()[0], 2);
        assert_eq!(q.try_next().unwrap().data()[0], 3);
        assert!(q.try_next().is_none());
    }

    #[test]
    fn test_drop_when_consumer_holds_buffers() {
        let q = queue(2, 2);
        q.try_publish(&[1]).unwrap();
        q.try_publish(&[2]).unwrap();
        let held: Vec<_> = std::iter::from_fn(|| q.try_next()).collect();
        assert_eq!(held.len(), 2);

        assert_eq!(q.try_publish(&[3]).unwrap(), PublishOutcome::Dropped);
        assert_eq!(q.stats().dropped, 1);

        drop(held);
        assert_eq!(q.try_publish(&[4]).unwrap(), PublishOutcome::Published);
    }

    #[test]
    fn test_single_buffer_newest_frame_replaces_queued() {
        let q = queue(1, 2);
        assert_eq!(q.try_publish(&[1]).unwrap(), PublishOutcome::Published);
        assert_eq!(q.try_publish(&[2]).unwrap(), PublishOutcome::Published);

        let stats = q.stats();
        assert_eq!(stats.dropped, 0);
        assert_eq!(stats.evicted, 1);

        assert_eq!(q.try_next().unwrap().data()[0], 2);
        assert!(q.try_next().is_none());
    }

    #[test]
    fn test_checkout_retries_when_ring_empty() {
        let q = queue(1, 1);
        q.try_publish(&[1]).unwrap();
        let held = q.try_next().unwrap();
        assert!(q.checkout().is_none());

        drop(held);
        assert!(q.checkout().is_some());
        assert_eq!(q.stats().dropped, 1);
    }

    #[test]
    fn test_flow_accounting_after_clear_and_resize() {
        let q = queue(4, 4);
        for i in 0..3u8 {
            q.try_publish(&[i]).unwrap();
        }
        drop(q.try_next());
        q.clear();

        q.try_publish(&[9]).unwrap();
        q.set_buffer_size(32).unwrap();

        let stats = q.stats();
        assert_eq!(stats.published, 4);
        assert_eq!(stats.published, stats.consumed + stats.evicted + stats.queued as u64);
        assert_eq!(stats.evicted, 3);
    }

    #[test]
    fn test_drain_latest() {
        let q = queue(4, 4);
        for i in 0..3u8 {
            q.try_publish(&[i]).unwrap();
        }

        let latest = q.drain_latest().unwrap();
        assert_eq!(latest.data()[0], 2);
        assert!(q.is_empty());
        assert_eq!(q.pool().available(), 3);
        assert!(q.drain_latest().is_none());
    }

    #[test]
    fn test_manual_checkout_publish() {
        let q = queue(2, 2);
        let mut entry = q.checkout().unwrap();
        entry.data_mut()[..4].copy_from_slice(&7u32.to_le_bytes());
        q.publish(entry);

        let frame = q.try_next().unwrap();
        assert_eq!(&frame.data()[..4], &7u32.to_le_bytes());
    }

    #[test]
    fn test_set_buffer_size_clears_queue() {
        let q = queue(2, 2);
        q.try_publish(&[1]).unwrap();

        q.set_buffer_size(32).unwrap();
        assert!(q.is_empty());
        assert_eq!(q.buffer_size(), 32);
        assert_eq!(q.pool().available(), 2);
        assert_eq!(q.checkout().unwrap().len(), 32);
        assert!(q.set_buffer_size(0).unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_clear_and_stats() {
        let q = queue(3, 3);
        q.try_publish(&[1]).unwrap();
        q.try_publish(&[2]).unwrap();
        q.clear();

        let stats = q.stats();
        assert_eq!(stats.published, 2);
        assert_eq!(stats.consumed, 0);
        assert_eq!(stats.evicted, 2);
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.pool.available, 3);
        assert_eq!(stats.pool.checkouts, 2);
        assert_eq!(stats.pool.returns, 2);
    }
}
