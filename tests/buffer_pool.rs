//! Buffer pool behavior visible from outside the crate: sizing invariants,
//! retain/drop reference counting, and concurrent acquisition.

use std::thread;

use mongo_core::buffer::{BufferPool, CEILING_BYTES};

#[test]
fn pooled_buffers_round_capacity_up_to_a_power_of_two() {
    let pool = BufferPool::new();
    let buf = pool.acquire(100);
    assert_eq!(buf.limit(), 100);
    assert_eq!(buf.capacity(), 128);
}

#[test]
fn oversized_buffers_are_exactly_sized() {
    let pool = BufferPool::new();
    let buf = pool.acquire(CEILING_BYTES + 1);
    assert_eq!(buf.capacity(), CEILING_BYTES + 1);
    assert_eq!(buf.limit(), CEILING_BYTES + 1);
}

#[test]
fn retained_handle_outlives_the_original() {
    let pool = BufferPool::new();
    let mut buf = pool.acquire(32);
    buf.with_mut_slice(|s| s.fill(0xab));
    let retained = buf.retain();
    drop(buf);
    assert_eq!(retained.to_vec(), vec![0xabu8; 32]);
}

#[test]
fn concurrent_acquisition_does_not_corrupt_other_buffers() {
    let pool = BufferPool::new();
    let handles: Vec<_> = (0..16u8)
        .map(|i| {
            let pool = pool.clone();
            thread::spawn(move || {
                let mut buf = pool.acquire(256);
                buf.with_mut_slice(|s| s.fill(i));
                for _ in 0..100 {
                    assert!(buf.with_slice(|s| s.iter().all(|&b| b == i)));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn zero_byte_acquisition_is_well_formed() {
    let pool = BufferPool::new();
    let buf = pool.acquire(0);
    assert_eq!(buf.limit(), 0);
    assert!(buf.to_vec().is_empty());
}
