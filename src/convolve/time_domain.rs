//! Direct time-domain FIR convolution via a double-mapped ring buffer.
//!
//! Zero latency, `O(block_size * ir_length)`, used for the short head
//! segment of a [`crate::convolve::mono::MonoConvolver`] where an
//! FFT's latency would be worse than its savings.

use crate::error::{ConvolveError, ConvolveResult};
use crate::sample::{Sample, convert_in, convert_out};
use crate::simd::{AlignedVec, Lane};

/// Impulse responses longer than this must go through an FFT-based
/// engine instead.
pub const MAX_LENGTH: usize = 2044;

pub struct TimeDomainConvolver<S> {
    capacity: usize,
    impulse: AlignedVec<S>,
    /// Double-mapped ring: sample written to `history[i]` is mirrored
    /// at `history[i + capacity]`, so any `capacity`-long window
    /// starting at the write cursor is contiguous in memory.
    history: AlignedVec<S>,
    write_pos: usize,
    length: usize,
}

impl<S: Sample + Lane> TimeDomainConvolver<S> {
    pub fn new(capacity: usize) -> ConvolveResult<Self> {
        if capacity == 0 || capacity > MAX_LENGTH {
            return Err(ConvolveError::TimeLengthOutOfRange);
        }
        Ok(Self {
            capacity,
            impulse: AlignedVec::zeroed(capacity),
            history: AlignedVec::zeroed(capacity * 2),
            write_pos: 0,
            length: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn latency(&self) -> usize {
        0
    }

    /// Loads a new impulse response, which must fit within `capacity`.
    pub fn set(&mut self, ir: &[S]) -> ConvolveResult<()> {
        if ir.len() > self.capacity {
            log::warn!(
                "time-domain convolver: impulse response of {} samples exceeds capacity of {}",
                ir.len(),
                self.capacity
            );
            return Err(ConvolveError::TimeImpulseTooLong);
        }
        self.impulse.fill(S::zero());
        self.impulse[..ir.len()].copy_from_slice(ir);
        self.length = ir.len();
        Ok(())
    }

    pub fn reset(&mut self) {
        self.history.fill(S::zero());
        self.write_pos = 0;
    }

    #[inline]
    pub fn process_sample(&mut self, input: S) -> S {
        if self.length == 0 {
            return S::zero();
        }

        self.write_pos = if self.write_pos == 0 {
            self.capacity - 1
        } else {
            self.write_pos - 1
        };
        self.history[self.write_pos] = input;
        self.history[self.write_pos + self.capacity] = input;

        let window = &self.history[self.write_pos..self.write_pos + self.length];
        S::dot(window, &self.impulse[..self.length])
    }

    /// Processes a block of caller-supplied samples, which may be of a
    /// different floating-point width than this engine's internal
    /// compute type `S`; conversion happens once per sample at this
    /// boundary, never inside [`Self::process_sample`].
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
