//! Non-uniformly-partitioned convolution (NUPC): one input channel to
//! one output channel, composed from a short zero/low-latency head
//! stage plus a handful of FFT stages of increasing size.
//!
//! Gardner's method trades a little latency from the largest stage for
//! a large reduction in average CPU cost versus a single uniformly
//! partitioned engine sized for the whole impulse response: most of an
//! impulse response's energy is convolved in large, infrequent blocks,
//! while the first few milliseconds get near-zero-latency treatment.
//!
//! The largest stage is also the one most likely to need reloading at
//! a different length while audio is running (a new cabinet IR, a new
//! room), so it alone is held behind a [`MemorySwap`], letting a
//! control thread replace or grow it without ever blocking the audio
//! thread. The audio thread's `attempt` either succeeds and the whole
//! sample is summed normally, or fails and the *entire* call emits
//! silence rather than advancing the fixed stages out of step with it.

use std::sync::Arc;

use crate::error::{ConvolveError, ConvolveResult};
use crate::fft::{self, Setup};
use crate::memory_swap::MemorySwap;
use crate::sample::{Sample, convert_in, convert_out};
use crate::simd::Lane;

use super::partitioned::PartitionedConvolver;
use super::time_domain::TimeDomainConvolver;

/// Controls how much of the head of the impulse response is handled
/// by a zero-latency time-domain stage versus the smallest FFT stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyMode {
    /// Zero-latency time-domain head, then FFT stages at 256/1024/4096/16384.
    /// Highest CPU cost of the three modes.
    Zero,
    /// All-FFT, smallest stage at 256 samples (128-sample latency).
    Short,
    /// All-FFT, smallest stage at 1024 samples (512-sample latency).
    /// Lowest CPU cost; use when 512 samples of latency is acceptable.
    Medium,
}

impl LatencyMode {
    fn fft_sizes(self) -> &'static [usize] {
        match self {
            LatencyMode::Zero | LatencyMode::Short => &[256, 1024, 4096, 16384],
            LatencyMode::Medium => &[1024, 4096, 16384],
        }
    }

    fn has_time_domain_head(self) -> bool {
        matches!(self, LatencyMode::Zero)
    }
}

/// One fixed-size tap in the non-uniform chain. A tagged-variant enum
/// dispatches to whichever concrete engine this tap uses without the
/// overhead (or the `dyn`-object-safety headaches) of a trait object;
/// every variant implements the same `process_sample`/`set`/`reset`
/// surface.
enum SubEngine<S> {
    Time(TimeDomainConvolver<S>),
    Partitioned(PartitionedConvolver<S>),
}

impl<S: Sample + Lane> SubEngine<S> {
    /// No-op for the time-domain head, which has no block schedule to
    /// offset.
    fn set_reset_offset(&mut self, offset: usize) {
        if let SubEngine::Partitioned(e) = self {
            e.set_reset_offset(offset);
        }
    }

    fn latency(&self) -> usize {
        match self {
            SubEngine::Time(e) => e.latency(),
            SubEngine::Partitioned(e) => e.latency(),
        }
    }

    fn max_length(&self) -> usize {
        match self {
            SubEngine::Time(e) => e.capacity(),
            SubEngine::Partitioned(e) => e.max_ir_length(),
        }
    }

    fn set(&mut self, ir: &[S]) -> ConvolveResult<()> {
        match self {
            SubEngine::Time(e) => e.set(ir),
            SubEngine::Partitioned(e) => e.set(ir),
        }
    }

    fn reset(&mut self) {
        match self {
            SubEngine::Time(e) => e.reset(),
            SubEngine::Partitioned(e) => e.reset(),
        }
    }

    #[inline]
    fn process_sample(&mut self, input: S) -> S {
        match self {
            SubEngine::Time(e) => e.process_sample(input),
            SubEngine::Partitioned(e) => e.process_sample(input),
        }
    }
}

/// One fixed-size stage of the chain: a sub-engine loaded with the
/// impulse response segment starting at `ir_start`, plus a small delay
/// line that lines its contribution up with every other stage's.
///
/// A stage's own output at call `n` reflects the impulse response
/// contribution for global time `n - (engine.latency() - ir_start)`
/// (clamped at zero for a stage whose segment starts after its
/// engine's own latency). Stages disagree on that effective delay
/// unless compensated, so [`MonoConvolver::new`] computes a single
/// latency shared by every stage and gives each one an `align` queue
/// exactly long enough to top its own delay up to it.
struct Stage<S> {
    engine: SubEngine<S>,
    ir_start: usize,
    align: Vec<S>,
    align_pos: usize,
}

impl<S: Sample + Lane> Stage<S> {
    fn set(&mut self, ir: &[S]) -> ConvolveResult<()> {
        let end = (self.ir_start + self.engine.max_length()).min(ir.len());
        if self.ir_start >= end {
            return self.engine.set(&[]);
        }
        self.engine.set(&ir[self.ir_start..end])
    }

    fn reset(&mut self) {
        self.engine.reset();
        self.align.fill(S::zero());
        self.align_pos = 0;
    }

    #[inline]
    fn process_sample(&mut self, input: S) -> S {
        let raw = self.engine.process_sample(input);
        push_align(&mut self.align, &mut self.align_pos, raw)
    }
}

/// Delay-line helper shared by [`Stage`] and [`ResizableStage`]: pushes
/// `raw` into a fixed-length ring and returns the value that fell out
/// the other end (or `raw` itself, unchanged, for an empty queue).
#[inline]
fn push_align<S: Sample>(align: &mut [S], align_pos: &mut usize, raw: S) -> S {
    if align.is_empty() {
        return raw;
    }
    let out = align[*align_pos];
    align[*align_pos] = raw;
    *align_pos = (*align_pos + 1) % align.len();
    out
}

/// The largest stage in the chain, held behind a [`MemorySwap`] so a
/// control thread can reload or grow it without blocking the audio
/// thread calling [`Self::try_process`]. Everything else about it
/// (the `ir_start` offset, the `align` delay line) mirrors [`Stage`].
struct ResizableStage<S> {
    swap: MemorySwap<PartitionedConvolver<S>>,
    part_size: usize,
    ir_start: usize,
    align: Vec<S>,
    align_pos: usize,
}

impl<S: Sample + Lane> ResizableStage<S> {
    fn new(setup: Arc<Setup<S>>, fft_log2: u32, capacity_partitions: usize, ir_start: usize) -> ConvolveResult<Self> {
        let part_size = (1usize << fft_log2) / 2;
        let swap = MemorySwap::with_capacity(
            capacity_partitions,
            Box::new(move |caps: usize| PartitionedConvolver::new(Arc::clone(&setup), fft_log2, caps).ok()),
            Box::new(|_v| {}),
        )
        .ok_or(ConvolveError::MemoryUnavailable)?;

        Ok(Self {
            swap,
            part_size,
            ir_start,
            align: Vec::new(),
            align_pos: 0,
        })
    }

    fn latency(&self) -> usize {
        self.part_size
    }

    fn max_length(&self) -> usize {
        self.swap.capacity() * self.part_size
    }

    /// Grows the backing partitioned convolver to hold `new_max_length`
    /// samples of this stage's segment of the impulse response, if it
    /// doesn't already. A no-op if already large enough.
    fn resize(&mut self, new_max_length: usize) -> ConvolveResult<()> {
        let needed = new_max_length.div_ceil(self.part_size.max(1)).max(1);
        if self.swap.equal(needed) {
            return Ok(());
        }
        if self.swap.grow(needed) {
            Ok(())
        } else {
            Err(ConvolveError::MemoryUnavailable)
        }
    }

    fn set(&mut self, ir: &[S], request_resize: bool) -> ConvolveResult<()> {
        if request_resize {
            let remaining = ir.len().saturating_sub(self.ir_start);
            self.resize(remaining)?;
        }
        let Some(mut handle) = self.swap.access() else {
            return Err(ConvolveError::MemoryUnavailable);
        };
        let end = (self.ir_start + handle.max_ir_length()).min(ir.len());
        if self.ir_start >= end {
            return handle.set(&[]);
        }
        handle.set(&ir[self.ir_start..end])
    }

    fn reset(&mut self) {
        if let Some(mut handle) = self.swap.access() {
            handle.reset();
        }
        self.align.fill(S::zero());
        self.align_pos = 0;
    }

    fn set_reset_offset(&mut self, offset: usize) {
        if let Some(mut handle) = self.swap.access() {
            handle.set_reset_offset(offset);
        }
    }

    /// Attempts the non-blocking lock and, if acquired, processes one
    /// sample through the backing engine. Returns `None` on contention
    /// so the caller can silence the whole [`MonoConvolver::process_sample`]
    /// call rather than let the fixed stages run out of step with it.
    #[inline]
    fn try_process(&mut self, input: S) -> Option<S> {
        let mut handle = self.swap.attempt()?;
        let raw = handle.process_sample(input);
        drop(handle);
        Some(push_align(&mut self.align, &mut self.align_pos, raw))
    }
}

pub struct MonoConvolver<S> {
    stages: Vec<Stage<S>>,
    resizable: ResizableStage<S>,
    max_length: usize,
    latency: usize,
}

impl<S: Sample + Lane> MonoConvolver<S> {
    /// Builds a chain sized to hold an impulse response of up to
    /// `max_length` samples in `mode`'s latency/CPU tradeoff. The last
    /// (largest) FFT stage is resizable later via [`Self::resize`].
    pub fn new(max_length: usize, mode: LatencyMode) -> ConvolveResult<Self> {
        let sizes = mode.fft_sizes();
        let max_size = sizes.iter().copied().max().unwrap_or(1024);
        let max_fft_log2 = fft::checked_log2(max_size)?;
        let setup = Arc::new(
            Setup::new(max_fft_log2.max(crate::fft::MIN_FFT_LOG2))
                .ok_or(ConvolveError::FftSizeOutOfRange)?,
        );

        // (latency, ir_start, max_length) for every tap, fixed and
        // resizable alike, so the shared alignment latency below is
        // computed once over the whole chain.
        let mut fixed: Vec<(SubEngine<S>, usize)> = Vec::with_capacity(sizes.len());
        let mut cursor = 0usize;
        let mut remaining = max_length;

        if mode.has_time_domain_head() {
            let head_len = (sizes[0] / 2).min(super::time_domain::MAX_LENGTH).min(remaining.max(1));
            let engine = SubEngine::Time(TimeDomainConvolver::new(head_len.max(1))?);
            fixed.push((engine, cursor));
            cursor += head_len;
            remaining = remaining.saturating_sub(head_len);
        }

        let last_idx = sizes.len() - 1;
        let mut resizable_info: Option<(u32, usize, usize)> = None; // (fft_log2, num_partitions, ir_start)

        for (i, &size) in sizes.iter().enumerate() {
            let log2 = fft::checked_log2(size)?;
            let part_size = size / 2;
            let is_last = i == last_idx;
            let num_partitions = if is_last {
                remaining.div_ceil(part_size).max(1)
            } else {
                1
            };

            if is_last {
                resizable_info = Some((log2, num_partitions, cursor));
                cursor += num_partitions * part_size;
                continue;
            }

            let engine = SubEngine::Partitioned(PartitionedConvolver::new(Arc::clone(&setup), log2, num_partitions)?);
            fixed.push((engine, cursor));
            let covered = num_partitions * part_size;
            cursor += covered;
            remaining = remaining.saturating_sub(covered);
        }

        let (resizable_log2, resizable_partitions, resizable_ir_start) =
            resizable_info.expect("fft_sizes() is always non-empty");
        let mut resizable =
            ResizableStage::new(Arc::clone(&setup), resizable_log2, resizable_partitions, resizable_ir_start)?;

        // Every tap's raw output already carries `engine.latency()`
        // samples of its own buffering delay relative to its segment's
        // start at `ir_start`. Left alone, a tap whose segment starts
        // before its engine's latency (the common case for every tap
        // but the first) would deliver its contribution *earlier*,
        // relative to the true convolution, than a tap that starts
        // after its latency. Pick the single largest such delay and
        // give every other tap an `align` queue that tops it up to
        // match, so summing tap outputs directly is correct.
        let latency = fixed
            .iter()
            .map(|(engine, ir_start)| engine.latency().saturating_sub(*ir_start))
            .chain(std::iter::once(resizable.latency().saturating_sub(resizable.ir_start)))
            .max()
            .unwrap_or(0);

        let stages = fixed
            .into_iter()
            .map(|(engine, ir_start)| {
                let extra = (latency + ir_start).saturating_sub(engine.latency());
                Stage {
                    engine,
                    ir_start,
                    align: vec![S::zero(); extra],
                    align_pos: 0,
                }
            })
            .collect();

        let extra = (latency + resizable.ir_start).saturating_sub(resizable.latency());
        resizable.align = vec![S::zero(); extra];

        Ok(Self {
            stages,
            resizable,
            max_length: cursor,
            latency,
        })
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Grows the resizable (largest) stage so this convolver can hold
    /// an impulse response of up to `new_max_length` samples without a
    /// subsequent [`Self::set`] needing `request_resize`. Leaves every
    /// fixed stage untouched; only the chain's total `max_length`
    /// bookkeeping changes to reflect the new capacity.
    pub fn resize(&mut self, new_max_length: usize) -> ConvolveResult<()> {
        let fixed_capacity = self.resizable.ir_start;
        let resizable_need = new_max_length.saturating_sub(fixed_capacity);
        self.resizable.resize(resizable_need)?;
        self.max_length = fixed_capacity + self.resizable.max_length();
        Ok(())
    }

    /// Randomizes each FFT stage's internal block-scheduling phase.
    /// Construction otherwise starts every instance's stages aligned
    /// at phase zero, which is deterministic (good for tests) but
    /// means N concurrently running instances of the same
    /// configuration all run their expensive forward/inverse FFT pair
    /// on the same sample. Call this once after construction when
    /// running many instances side by side (e.g. one per track) to
    /// spread that cost across the block instead.
    pub fn randomize_schedule_phase(&mut self) {
        for stage in &mut self.stages {
            let part_size = match &stage.engine {
                SubEngine::Partitioned(e) => e.part_size(),
                SubEngine::Time(_) => continue,
            };
            stage.engine.set_reset_offset(rand::random::<u32>() as usize % part_size);
        }
        self.resizable
            .set_reset_offset(rand::random::<u32>() as usize % self.resizable.part_size);
    }

    /// Fixed output delay shared by every stage once summed.
    pub fn latency(&self) -> usize {
        self.latency
    }

    /// Loads a new impulse response. If `request_resize` is `true` and
    /// `ir` is longer than the resizable stage's current capacity, it
    /// is grown to fit first; otherwise a too-long `ir` is loaded as a
    /// clamped prefix and `Err(MemoryAllocTooSmall)` is returned (the
    /// fixed stages still load their own segments normally either way).
    pub fn set(&mut self, ir: &[S], request_resize: bool) -> ConvolveResult<()> {
        for stage in &mut self.stages {
            stage.set(ir)?;
        }
        self.resizable.set(ir, request_resize)
    }

    pub fn reset(&mut self) {
        for stage in &mut self.stages {
            stage.reset();
        }
        self.resizable.reset();
    }

    #[inline]
    pub fn process_sample(&mut self, input: S) -> S {
        let Some(resizable_out) = self.resizable.try_process(input) else {
            return S::zero();
        };
        let mut sum = resizable_out;
        for stage in &mut self.stages {
            sum += stage.process_sample(input);
        }
        sum
    }

    /// Processes a block of caller-supplied samples, converting to and
    /// from this convolver's internal compute type `S` at the boundary.
    pub fn process<IO: Sample>(&mut self, input: &[IO], output: &mut [IO], accumulate: bool) {
        debug_assert_eq!(input.len(), output.len());
        for (x, y) in input.iter().zip(output.iter_mut()) {
            let s = self.process_sample(convert_in(*x));
            let out: IO = convert_out(s);
            if accumulate {
                *y += out;
            } else {
                *y = out;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_impulse_passes_input_through_at_fixed_latency() {
        let mut conv = MonoConvolver::<f64>::new(2000, LatencyMode::Zero).unwrap();
        conv.set(&[1.0], false).unwrap();

        let mut input: Vec<f64> = vec![0.0; 4000];
        input[0] = 1.0;
        let mut out: Vec<f64> = vec![0.0; input.len()];
        conv.process(&input, &mut out, false);

        let latency = conv.latency();
        for (i, &y) in out.iter().enumerate() {
            let expect = if i == latency { 1.0 } else { 0.0 };
            assert!((y - expect).abs() < 1e-6, "i={i} y={y} latency={latency}");
        }
    }

    #[test]
    fn medium_mode_has_no_zero_latency_head() {
        let conv = MonoConvolver::<f32>::new(20_000, LatencyMode::Medium).unwrap();
        assert!(conv.latency() >= 512);
    }

    #[test]
    fn reset_is_idempotent_and_silences_output() {
        let mut conv = MonoConvolver::<f32>::new(4000, LatencyMode::Short).unwrap();
        conv.set(&vec![0.1f32; 2000], false).unwrap();
        conv.process(&vec![1.0f32; 3000], &mut vec![0.0f32; 3000], false);

        conv.reset();
        conv.reset();

        let mut out = vec![0.0f32; 1000];
        conv.process(&vec![0.0f32; 1000], &mut out, false);
        assert!(out.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn zero_mode_includes_the_16384_tail_stage() {
        assert_eq!(LatencyMode::Zero.fft_sizes(), &[256, 1024, 4096, 16384]);
    }

    #[test]
    fn resize_grows_capacity_for_a_longer_impulse_response() {
        let mut conv = MonoConvolver::<f64>::new(2000, LatencyMode::Medium).unwrap();
        assert!(conv.max_length() < 10_000);

        conv.resize(10_000).unwrap();
        assert!(conv.max_length() >= 10_000);

        let ir: Vec<f64> = (0..9000).map(|i| ((i * 13 % 29) as f64 - 14.0) * 0.01).collect();
        conv.set(&ir, false).unwrap();

        let input = vec![1.0; 200];
        let mut out = vec![0.0; 200];
        conv.process(&input, &mut out, false);
        assert!(out.iter().any(|&x| x != 0.0));
    }

    #[test]
    fn set_with_request_resize_grows_to_fit_a_longer_ir() {
        let mut conv = MonoConvolver::<f64>::new(500, LatencyMode::Medium).unwrap();
        let ir: Vec<f64> = (0..5000).map(|i| ((i * 7 % 17) as f64 - 8.0) * 0.02).collect();

        conv.set(&ir, true).unwrap();
        assert!(conv.max_length() >= 5000);

        let input = vec![1.0; 64];
        let mut out = vec![0.0; 64];
        conv.process(&input, &mut out, false);
        assert!(out.iter().any(|&x| x != 0.0));
    }
}
