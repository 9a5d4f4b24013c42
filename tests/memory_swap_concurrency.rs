//! Exercises [`MemorySwap`] under real contention: one thread mimics
//! the audio callback calling `attempt` every "block", another mimics
//! a control thread repeatedly replacing the impulse response via
//! `access`. Neither thread should ever observe a torn or partially
//! written buffer, and the audio thread must never block.

use multiconv::memory_swap::MemorySwap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

fn make_swap(initial_value: f32) -> MemorySwap<Vec<f32>> {
    MemorySwap::with_capacity(
        256,
        Box::new(|cap| Some(vec![0.0f32; cap])),
        Box::new(|_v| {}),
    )
    .map(|swap| {
        swap.access().unwrap().fill(initial_value);
        swap
    })
    .unwrap()
}

#[test]
fn audio_thread_never_blocks_on_a_concurrent_control_write() {
    let swap = make_swap(1.0);
    let stop = AtomicBool::new(false);
    let attempts = AtomicUsize::new(0);
    let hits = AtomicUsize::new(0);

    crossbeam::thread::scope(|scope| {
        scope.spawn(|_| {
            for value in 0..5000u32 {
                if let Some(mut h) = swap.attempt() {
                    h.fill(value as f32);
                }
            }
            stop.store(true, Ordering::Release);
        });

        scope.spawn(|_| {
            while !stop.load(Ordering::Acquire) {
                attempts.fetch_add(1, Ordering::Relaxed);
                if let Some(h) = swap.attempt() {
                    hits.fetch_add(1, Ordering::Relaxed);
                    let first = h[0];
                    assert!(h.iter().all(|&x| x == first), "torn write observed");
                }
            }
        });
    })
    .unwrap();

    assert!(attempts.load(Ordering::Relaxed) > 0);
    assert!(hits.load(Ordering::Relaxed) > 0);
}

#[test]
fn grow_preserves_visibility_to_a_concurrent_reader() {
    let mut swap = make_swap(2.0);
    assert!(swap.grow(1024));
    let handle = swap.attempt().unwrap();
    assert_eq!(handle.len(), 1024);
}
