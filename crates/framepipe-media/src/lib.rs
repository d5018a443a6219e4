//! Bounded handoff of raw media frames between a producer thread and a
//! consumer tick.
//!
//! - [`RingBuffer`]: fixed-capacity queue that drops the oldest item on overflow.
//! - [`BufferPool`]: fixed set of equally sized byte buffers lent out as [`PoolEntry`].
//! - [`FrameQueue`]: the two combined into a producer to consumer pipeline.

#![forbid(unsafe_code)]

pub mod buffer_pool;
pub use buffer_pool::{BufferPool, BufferPoolStats, PoolEntry};

pub mod frame_queue;
pub use frame_queue::{FrameQueue, FrameQueueConfig, FrameQueueStats, PublishOutcome};

pub mod ring_buffer;
pub use ring_buffer::RingBuffer;

pub use framepipe_common::{Error, Result};
