//! Verifies the audio-path `process`/`process_sample` calls never
//! touch the heap once a convolver has been built and its impulse
//! response loaded: all scratch buffers are allocated up front in
//! `new`/`set`, never in the per-sample hot loop.

use assert_no_alloc::{AllocDisabler, assert_no_alloc};
use multiconv::convolve::{LatencyMode, MonoConvolver};

#[global_allocator]
static ALLOCATOR: AllocDisabler = AllocDisabler;

#[test]
fn mono_convolver_process_does_not_allocate() {
    let mut conv = MonoConvolver::<f32>::new(4000, LatencyMode::Short).unwrap();
    conv.set(&vec![0.1f32; 2000], false).unwrap();

    // Warm up once outside the guard: the first few blocks may still
    // be touching freshly-committed pages.
    let mut scratch = vec![0.0f32; 512];
    conv.process(&vec![1.0f32; 512], &mut scratch, false);

    let input = vec![0.5f32; 4096];
    let mut output = vec![0.0f32; 4096];

    assert_no_alloc(|| {
        conv.process(&input, &mut output, false);
    });
}
