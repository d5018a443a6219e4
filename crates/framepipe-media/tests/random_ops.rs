//! Randomized operation sequences against the ring buffer and buffer pool.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use framepipe_media::{BufferPool, PoolEntry, RingBuffer};

#[test]
fn random_ring_ops_match_model() {
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for capacity in 1..=6 {
        let ring = RingBuffer::new(capacity).unwrap();
        let mut model = std::collections::VecDeque::new();

        for next in 0..2_000u32 {
            match rng.gen_range(0..10) {
                0..=5 => {
                    ring.enqueue(next);
                    if model.len() == capacity {
                        model.pop_front();
                    }
                    model.push_back(next);
                }
                6..=8 => assert_eq!(ring.try_dequeue(), model.pop_front()),
                _ => {
                    ring.clear_all_but_last();
                    if let Some(last) = model.pop_back() {
                        model.clear();
                        model.push_back(last);
                    }
                }
            }

            assert_eq!(ring.len(), model.len());
            assert!(ring.len() <= capacity);
            assert_eq!(ring.is_full(), model.len() == capacity);
            assert_eq!(ring.is_empty(), model.is_empty());
        }
    }
}

#[test]
fn random_pool_ops_never_leak() {
    let mut rng = StdRng::seed_from_u64(42);
    let pool = BufferPool::new(5, 16).unwrap();
    let mut held: Vec<PoolEntry> = Vec::new();

    for _ in 0..5_000 {
        match rng.gen_range(0..10) {
            0..=4 => match pool.try_get() {
                Some(entry) => held.push(entry),
                None => assert_eq!(held.len(), 5),
            },
            5..=7 if !held.is_empty() => {
                let index = rng.gen_range(0..held.len());
                let mut entry = held.swap_remove(index);
                entry.dispose();
                if rng.gen_bool(0.5) {
                    entry.dispose();
                }
            }
            8 => {
                let size = if rng.gen_bool(0.5) { 16 } else { 24 };
                held.clear();
                pool.set_buffer_size(size).unwrap();
            }
            _ => {}
        }

        assert_eq!(pool.checked_out(), held.len());
        assert_eq!(pool.available() + pool.checked_out(), pool.capacity());
        assert!(held.iter().all(|entry| entry.len() == pool.buffer_size()));
    }
}
