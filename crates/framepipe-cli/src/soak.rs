//! Soak run: a producer thread publishes sequence-numbered frames while a
//! consumer drains the queue on a fixed tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use clap::Args;
use framepipe_media::{FrameQueue, FrameQueueConfig, FrameQueueStats};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Bytes at the start of each frame holding its sequence number.
const SEQUENCE_BYTES: usize = 8;

#[derive(Args, Debug)]
pub struct SoakArgs {
    /// Number of frame buffers in the pool
    #[arg(long, env = "FRAMEPIPE_POOL_CAPACITY", default_value_t = 3)]
    pub pool_capacity: usize,

    /// Maximum number of frames waiting for the consumer
    #[arg(long, env = "FRAMEPIPE_RING_CAPACITY", default_value_t = 3)]
    pub ring_capacity: usize,

    /// Bytes per frame buffer (defaults to 720p RGBA)
    #[arg(long, env = "FRAMEPIPE_BUFFER_SIZE", default_value_t = 1280 * 720 * 4)]
    pub buffer_size: usize,

    /// Frames to produce
    #[arg(long, default_value_t = 600)]
    pub frames: u64,

    /// Delay between produced frames, in microseconds
    #[arg(long, default_value_t = 16_667)]
    pub produce_interval_us: u64,

    /// Consumer tick period, in milliseconds
    #[arg(long, default_value_t = 16)]
    pub tick_ms: u64,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

impl SoakArgs {
    fn queue_config(&self) -> FrameQueueConfig {
        FrameQueueConfig {
            pool_capacity: self.pool_capacity,
            ring_capacity: self.ring_capacity,
            buffer_size: self.buffer_size,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SoakReport {
    pub config: FrameQueueConfig,
    pub elapsed_ms: u128,
    pub produced: u64,
    pub received: u64,
    pub out_of_order: u64,
    pub stats: FrameQueueStats,
}

impl SoakReport {
    pub fn log(&self) {
        info!(
            produced = self.produced,
            received = self.received,
            dropped = self.stats.dropped,
            evicted = self.stats.evicted,
            pressure_reliefs = self.stats.pressure_reliefs,
            out_of_order = self.out_of_order,
            elapsed_ms = self.elapsed_ms as u64,
            "soak finished"
        );
    }
}

pub fn run(args: &SoakArgs) -> Result<SoakReport> {
    let config = args.queue_config();
    if config.buffer_size < SEQUENCE_BYTES {
        anyhow::bail!("buffer size must be at least {SEQUENCE_BYTES} bytes");
    }
    let queue = FrameQueue::new(config)?;
    let done = Arc::new(AtomicBool::new(false));
    let started = Instant::now();

    info!(
        pool_capacity = config.pool_capacity,
        ring_capacity = config.ring_capacity,
        buffer_size = config.buffer_size,
        frames = args.frames,
        "starting soak"
    );

    let producer = spawn_producer(
        queue.clone(),
        Arc::clone(&done),
        args.frames,
        Duration::from_micros(args.produce_interval_us),
    )?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let (received, out_of_order) = rt.block_on(consume(
        queue.clone(),
        Arc::clone(&done),
        Duration::from_millis(args.tick_ms.max(1)),
    ));

    producer
        .join()
        .map_err(|_| anyhow!("producer thread panicked"))??;

    Ok(SoakReport {
        config,
        elapsed_ms: started.elapsed().as_millis(),
        produced: args.frames,
        received,
        out_of_order,
        stats: queue.stats(),
    })
}

fn spawn_producer(
    queue: FrameQueue,
    done: Arc<AtomicBool>,
    frames: u64,
    interval: Duration,
) -> Result<thread::JoinHandle<Result<()>>> {
    let handle = thread::Builder::new()
        .name("framepipe-producer".into())
        .spawn(move || {
            let result = (0..frames).try_for_each(|seq| {
                if let Some(mut entry) = queue.checkout() {
                    entry.write_data(&seq.to_le_bytes(), 0, 0, SEQUENCE_BYTES)?;
                    queue.publish(entry);
                }
                if !interval.is_zero() {
                    thread::sleep(interval);
                }
                Ok::<(), anyhow::Error>(())
            });
            done.store(true, Ordering::SeqCst);
            result
        })?;
    Ok(handle)
}

async fn consume(queue: FrameQueue, done: Arc<AtomicBool>, tick: Duration) -> (u64, u64) {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut received = 0u64;
    let mut out_of_order = 0u64;
    let mut last_seq: Option<u64> = None;

    loop {
        ticker.tick().await;
        let finished = done.load(Ordering::SeqCst);

        let mut this_tick = 0;
        while let Some(frame) = queue.try_next() {
            let mut seq_bytes = [0u8; SEQUENCE_BYTES];
            seq_bytes.copy_from_slice(&frame.data()[..SEQUENCE_BYTES]);
            let seq = u64::from_le_bytes(seq_bytes);

            if last_seq.is_some_and(|last| seq <= last) {
                warn!(seq, last = ?last_seq, "frame out of order");
                out_of_order += 1;
            }
            last_seq = Some(seq);
            received += 1;
            this_tick += 1;
        }
        if this_tick > 1 {
            debug!(frames = this_tick, "consumer caught up on multiple frames");
        }

        if finished && queue.is_empty() {
            return (received, out_of_order);
        }
    }
}
