use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use framepipe_media::{FrameQueue, FrameQueueConfig, RingBuffer};

fn bench_frame_queue(c: &mut Criterion) {
    let config = FrameQueueConfig {
        pool_capacity: 3,
        ring_capacity: 3,
        buffer_size: 1280 * 720 * 4,
    };
    let queue = FrameQueue::new(config).unwrap();
    let frame = vec![0x5Au8; config.buffer_size];

    let mut group = c.benchmark_group("frame_queue");
    group.throughput(Throughput::Bytes(config.buffer_size as u64));
    group.bench_function("publish_consume_720p", |b| {
        b.iter(|| {
            queue.try_publish(&frame).unwrap();
            let entry = queue.try_next().unwrap();
            criterion::black_box(entry.data()[0]);
        })
    });
    group.bench_function("checkout_publish_no_copy", |b| {
        b.iter(|| {
            let entry = queue.checkout().unwrap();
            queue.publish(entry);
            drop(queue.try_next());
        })
    });
    group.finish();
}

fn bench_ring_buffer(c: &mut Criterion) {
    let ring = RingBuffer::new(64).unwrap();

    c.bench_function("ring_enqueue_overflow", |b| {
        let mut next = 0u64;
        b.iter(|| {
            ring.enqueue(next);
            next += 1;
        })
    });
}

criterion_group!(benches, bench_frame_queue, bench_ring_buffer);
criterion_main!(benches);
