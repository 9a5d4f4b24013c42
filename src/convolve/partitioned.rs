//! Uniformly-partitioned overlap-save FFT convolution.
//!
//! One `PartitionedConvolver` handles impulse response segments of a
//! single, fixed FFT size: the IR is split into `part_size = N/2`
//! sample chunks, each transformed once into a frequency-domain
//! partition at `set` time, and convolved against a ring of
//! frequency-domain input blocks every `part_size` samples (Gardner's
//! overlap-save scheduling). [`crate::convolve::mono::MonoConvolver`]
//! composes several of these at increasing FFT sizes to trade latency
//! for CPU cost across the length of a long impulse response.

use std::sync::Arc;

use crate::error::{ConvolveError, ConvolveResult};
use crate::fft::{self, Setup, SplitBuffer};
use crate::sample::{self, Sample, convert_in, convert_out};
use crate::simd::Lane;

pub struct PartitionedConvolver<S> {
    setup: Arc<Setup<S>>,
    fft_log2: u32,
    part_size: usize,
    capacity_partitions: usize,
    active_partitions: usize,

    impulse: Vec<SplitBuffer<S>>,
    history: Vec<SplitBuffer<S>>,
    history_pos: usize,

    freq_scratch: SplitBuffer<S>,
    accum: SplitBuffer<S>,
    time_scratch: Vec<S>,

    input_window: Vec<S>,
    cur_block: Vec<S>,
    fill: usize,

    pending_out: Vec<S>,
    drain_idx: usize,
}

impl<S: Sample + Lane> PartitionedConvolver<S> {
    /// `capacity_partitions` is the maximum number of `N/2`-sample
    /// segments this engine can hold; `set` may load fewer.
    pub fn new(setup: Arc<Setup<S>>, fft_log2: u32, capacity_partitions: usize) -> ConvolveResult<Self> {
        if fft_log2 < fft::MIN_FFT_LOG2 || fft_log2 > setup.max_log2() {
            return Err(ConvolveError::FftSizeOutOfRange);
        }
        let n = 1usize << fft_log2;
        let part_size = n / 2;
        let history_len = capacity_partitions.max(1);

        Ok(Self {
            setup,
            fft_log2,
            part_size,
            capacity_partitions,
            active_partitions: 0,
            impulse: (0..capacity_partitions)
                .map(|_| SplitBuffer::zeroed(part_size))
                .collect(),
            history: (0..history_len).map(|_| SplitBuffer::zeroed(part_size)).collect(),
            history_pos: 0,
            freq_scratch: SplitBuffer::zeroed(part_size),
            accum: SplitBuffer::zeroed(part_size),
            time_scratch: vec![S::zero(); n],
            input_window: vec![S::zero(); n],
            cur_block: vec![S::zero(); part_size],
            fill: 0,
            pending_out: vec![S::zero(); part_size],
            drain_idx: 0,
        })
    }

    /// Changes this engine's FFT size in place, reallocating every
    /// internal buffer for the new size and resetting all state. A
    /// no-op (besides the validation) if `fft_size` maps to the
    /// currently active `fft_log2`. `capacity_partitions` (and thus
    /// [`Self::max_ir_length`]) is preserved across the change; any
    /// loaded impulse response is discarded and must be reloaded via
    /// [`Self::set`].
    pub fn set_fft_size(&mut self, fft_size: usize) -> ConvolveResult<()> {
        let log2 = fft::checked_log2(fft_size)?;
        if log2 < fft::MIN_FFT_LOG2 || log2 > self.setup.max_log2() {
            return Err(ConvolveError::FftSizeOutOfRange);
        }
        if log2 == self.fft_log2 {
            return Ok(());
        }

        self.fft_log2 = log2;
        self.part_size = fft_size / 2;
        let part_size = self.part_size;
        let history_len = self.capacity_partitions.max(1);

        self.active_partitions = 0;
        self.impulse = (0..self.capacity_partitions)
            .map(|_| SplitBuffer::zeroed(part_size))
            .collect();
        self.history = (0..history_len).map(|_| SplitBuffer::zeroed(part_size)).collect();
        self.history_pos = 0;
        self.freq_scratch = SplitBuffer::zeroed(part_size);
        self.accum = SplitBuffer::zeroed(part_size);
        self.time_scratch = vec![S::zero(); fft_size];
        self.input_window = vec![S::zero(); fft_size];
        self.cur_block = vec![S::zero(); part_size];
        self.fill = 0;
        self.pending_out = vec![S::zero(); part_size];
        self.drain_idx = 0;

        Ok(())
    }

    /// Offsets this engine's internal block-scheduling phase by
    /// `offset` samples (mod `part_size`). Two engines of the same FFT
    /// size given different offsets never run their (expensive)
    /// forward/inverse FFT pair on the same sample, which matters when
    /// several convolver instances share an audio callback: without
    /// this, all of them spike the CPU on the same block boundary.
    /// Only meaningful right after construction or `reset`.
    pub fn set_reset_offset(&mut self, offset: usize) {
        self.fill = offset % self.part_size.max(1);
    }

    pub fn fft_log2(&self) -> u32 {
        self.fft_log2
    }

    pub fn part_size(&self) -> usize {
        self.part_size
    }

    /// Samples of latency this engine introduces: a block's output is
    /// only available once the next block of the same size has been
    /// filled.
    pub fn latency(&self) -> usize {
        self.part_size
    }

    pub fn max_ir_length(&self) -> usize {
        self.capacity_partitions * self.part_size
    }

    /// Loads an impulse response segment, forward-transforming it one
    /// `part_size`-sample partition at a time. `ir` may be shorter
    /// than [`Self::max_ir_length`]; the remaining partitions are
    /// zeroed. Does not touch the input/output history, so a `set`
    /// while mid-stream does not click.
    /// Loads an impulse response segment, clamping it to
    /// [`Self::max_ir_length`] if it's longer: the fitting prefix is
    /// still loaded and `Err(MemoryAllocTooSmall)` is returned to
    /// report the truncation, rather than refusing the whole load.
    pub fn set(&mut self, ir: &[S]) -> ConvolveResult<()> {
        let capacity = self.max_ir_length();
        let (ir, overflowed) = if ir.len() > capacity {
            log::warn!(
                "partitioned convolver: impulse response of {} samples exceeds capacity of {}, truncating",
                ir.len(),
                capacity
            );
            (&ir[..capacity], true)
        } else {
            (ir, false)
        };

        self.active_partitions = ir.len().div_ceil(self.part_size.max(1));

        let mut pack = vec![S::zero(); 1usize << self.fft_log2];
        for (p, partition) in self.impulse.iter_mut().enumerate() {
            let start = p * self.part_size;
            if start >= ir.len() {
                partition.fill_zero();
                continue;
            }
            let end = (start + self.part_size).min(ir.len());
            pack.fill(S::zero());
            pack[..end - start].copy_from_slice(&ir[start..end]);

            fft::unzip(&pack, &mut partition.as_split(), self.fft_log2);
            fft::rfft(&self.setup, &mut partition.as_split(), self.fft_log2);
        }

        if overflowed {
            return Err(ConvolveError::MemoryAllocTooSmall);
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        for h in &mut self.history {
            h.fill_zero();
        }
        self.history_pos = 0;
        self.freq_scratch.fill_zero();
        self.accum.fill_zero();
        self.time_scratch.fill(S::zero());
        self.input_window.fill(S::zero());
        self.cur_block.fill(S::zero());
        self.fill = 0;
        self.pending_out.fill(S::zero());
        self.drain_idx = 0;
    }

    #[inline]
    pub fn process_sample(&mut self, input: S) -> S {
        if self.capacity_partitions == 0 {
            return S::zero();
        }

        let out = self.pending_out[self.drain_idx];
        self.drain_idx += 1;

        self.cur_block[self.fill] = input;
        self.fill += 1;
        if self.fill == self.part_size {
            self.run_block();
            self.fill = 0;
            self.drain_idx = 0;
        }

        out
    }

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

    fn run_block(&mut self) {
        let part_size = self.part_size;

        self.input_window.copy_within(part_size.., 0);
        self.input_window[part_size..].copy_from_slice(&self.cur_block);

        fft::unzip(&self.input_window, &mut self.freq_scratch.as_split(), self.fft_log2);
        fft::rfft(&self.setup, &mut self.freq_scratch.as_split(), self.fft_log2);

        if self.capacity_partitions > 0 {
            self.history_pos = (self.history_pos + self.capacity_partitions - 1) % self.capacity_partitions;
        }
        self.history[self.history_pos].re.copy_from_slice(&self.freq_scratch.re);
        self.history[self.history_pos].im.copy_from_slice(&self.freq_scratch.im);

        self.accum.fill_zero();
        for p in 0..self.active_partitions.min(self.capacity_partitions) {
            let h_idx = (self.history_pos + p) % self.capacity_partitions;
            complex_mac(&mut self.accum, &self.impulse[p], &self.history[h_idx]);
        }

        fft::rifft(&self.setup, &mut self.accum.as_split(), self.fft_log2);
        fft::zip(&self.accum.as_split(), &mut self.time_scratch, self.fft_log2);

        let n = 1usize << self.fft_log2;
        let scale: S = sample::from_f64(1.0 / (4.0 * n as f64));
        for (dst, &src) in self
            .pending_out
            .iter_mut()
            .zip(&self.time_scratch[part_size..])
        {
            *dst = src * scale;
        }
    }
}

/// Bin-wise split-complex multiply-accumulate. Bin 0 packs DC into
/// `re[0]` and Nyquist into `im[0]` (see [`crate::fft`]), both purely
/// real, so it skips the general complex product.
fn complex_mac<S: Sample>(accum: &mut SplitBuffer<S>, h: &SplitBuffer<S>, x: &SplitBuffer<S>) {
    accum.re[0] += h.re[0] * x.re[0];
    accum.im[0] += h.im[0] * x.im[0];
    for k in 1..accum.len() {
        let (hr, hi) = (h.re[k], h.im[k]);
        let (xr, xi) = (x.re[k], x.im[k]);
        accum.re[k] += hr * xr - hi * xi;
        accum.im[k] += hr * xi + hi * xr;
    }
}
