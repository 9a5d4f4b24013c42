//! Sums N independent [`MonoConvolver`]s into a single output channel:
//! the building block [`crate::convolve::multichannel::MultichannelConvolver`]
//! uses for each output channel's row of the IR matrix.

use crate::error::{ConvolveError, ConvolveResult};
use crate::sample::{Sample, convert_in, convert_out};
use crate::simd::Lane;

use super::mono::{LatencyMode, MonoConvolver};

pub struct NToMonoConvolver<S> {
    convolvers: Vec<MonoConvolver<S>>,
}

impl<S: Sample + Lane> NToMonoConvolver<S> {
    pub fn new(num_channels: usize, max_length: usize, mode: LatencyMode) -> ConvolveResult<Self> {
        let mut convolvers = Vec::with_capacity(num_channels);
        for _ in 0..num_channels {
            convolvers.push(MonoConvolver::new(max_length, mode)?);
        }
        Ok(Self { convolvers })
    }

    pub fn num_channels(&self) -> usize {
        self.convolvers.len()
    }

    pub fn latency(&self) -> usize {
        self.convolvers.iter().map(MonoConvolver::latency).max().unwrap_or(0)
    }

    fn channel_mut(&mut self, channel: usize) -> ConvolveResult<&mut MonoConvolver<S>> {
        self.convolvers
            .get_mut(channel)
            .ok_or(ConvolveError::InChannelOutOfRange)
    }

    /// Loads the impulse response for one input channel's contribution
    /// to this output.
    pub fn set(&mut self, channel: usize, ir: &[S], request_resize: bool) -> ConvolveResult<()> {
        self.channel_mut(channel)?.set(ir, request_resize)
    }

    /// Grows channel `channel`'s resizable stage to hold an impulse
    /// response of up to `new_max_length` samples.
    pub fn resize(&mut self, channel: usize, new_max_length: usize) -> ConvolveResult<()> {
        self.channel_mut(channel)?.resize(new_max_length)
    }

    pub fn reset(&mut self) {
        for conv in &mut self.convolvers {
            conv.reset();
        }
    }

    /// Convolves every input channel's sample against its own impulse
    /// response and writes the sum (or adds it, if `accumulate`) to
    /// `output`. `ins` holds one slice per input channel, all of equal
    /// length; channels beyond `num_channels()` in `active_in_chans`
    /// are silently ignored as the caller's active-channel mask.
    pub fn process<IO: Sample>(
        &mut self,
        ins: &[&[IO]],
        output: &mut [IO],
        active_in_chans: usize,
        accumulate: bool,
    ) {
        let active = active_in_chans.min(ins.len()).min(self.convolvers.len());
        if active == 0 {
            if !accumulate {
                output.fill(IO::zero());
            }
            return;
        }

        for (n, y) in output.iter_mut().enumerate() {
            let mut sum: S = self.convolvers[0]
                .process_sample(convert_in(ins[0].get(n).copied().unwrap_or(IO::zero())));
            for ch in 1..active {
                sum += self.convolvers[ch]
                    .process_sample(convert_in(ins[ch].get(n).copied().unwrap_or(IO::zero())));
            }
            let out: IO = convert_out(sum);
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
    fn sums_two_channels_with_delta_irs() {
        let mut conv = NToMonoConvolver::<f64>::new(2, 512, LatencyMode::Short).unwrap();
        conv.set(0, &[1.0], false).unwrap();
        conv.set(1, &[0.5], false).unwrap();

        let a = vec![1.0; 1024];
        let b = vec![2.0; 1024];
        let ins: Vec<&[f64]> = vec![&a, &b];
        let mut out = vec![0.0; 1024];
        conv.process(&ins, &mut out, 2, false);

        let latency = conv.latency();
        assert!((out[latency] - (1.0 * 1.0 + 0.5 * 2.0)).abs() < 1e-6);
    }

    #[test]
    fn set_rejects_channel_out_of_range() {
        let mut conv = NToMonoConvolver::<f32>::new(1, 64, LatencyMode::Medium).unwrap();
        assert_eq!(conv.set(1, &[1.0], false), Err(ConvolveError::InChannelOutOfRange));
    }

    #[test]
    fn resize_grows_a_single_channel() {
        let mut conv = NToMonoConvolver::<f64>::new(2, 500, LatencyMode::Medium).unwrap();
        conv.resize(0, 5000).unwrap();
        let ir: Vec<f64> = (0..4000).map(|i| ((i * 7 % 17) as f64 - 8.0) * 0.02).collect();
        conv.set(0, &ir, false).unwrap();
        conv.set(1, &[1.0], false).unwrap();

        let a = vec![1.0; 64];
        let b = vec![1.0; 64];
        let ins: Vec<&[f64]> = vec![&a, &b];
        let mut out = vec![0.0; 64];
        conv.process(&ins, &mut out, 2, false);
        assert!(out.iter().any(|&x| x != 0.0));
    }
}
