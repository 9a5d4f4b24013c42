//! Split-complex radix-2 FFT.
//!
//! Complex data is stored as two parallel real arrays `(re, im)`
//! rather than interleaved, the "split-complex" convention vDSP uses.
//! Real transforms pack the Nyquist bin into `im[0]` so a length-`N`
//! real spectrum fits in `N/2` complex slots.
//!
//! [`Setup`] is built once per maximum transform size and is immutable
//! and `Send + Sync` thereafter, so every engine that shares a
//! `Setup` (see [`crate::convolve::partitioned::PartitionedConvolver`])
//! can call `fft`/`rfft` concurrently from different convolver
//! instances without synchronization.

use crate::error::{ConvolveError, ConvolveResult};
use crate::sample::{self, Sample};
use crate::simd::AlignedVec;

/// A borrowed split-complex buffer: `re[i] + j*im[i]`.
pub struct Split<'a, S> {
    pub re: &'a mut [S],
    pub im: &'a mut [S],
}

impl<'a, S> Split<'a, S> {
    pub fn new(re: &'a mut [S], im: &'a mut [S]) -> Self {
        debug_assert_eq!(re.len(), im.len());
        Self { re, im }
    }

    pub fn len(&self) -> usize {
        self.re.len()
    }

    pub fn is_empty(&self) -> bool {
        self.re.is_empty()
    }

    pub fn reborrow(&mut self) -> Split<'_, S> {
        Split {
            re: self.re,
            im: self.im,
        }
    }
}

/// An owned split-complex buffer, aligned for SIMD access.
pub struct SplitBuffer<S> {
    pub re: AlignedVec<S>,
    pub im: AlignedVec<S>,
}

impl<S: Sample> SplitBuffer<S> {
    pub fn zeroed(len: usize) -> Self {
        Self {
            re: AlignedVec::zeroed(len),
            im: AlignedVec::zeroed(len),
        }
    }

    pub fn len(&self) -> usize {
        self.re.len()
    }

    pub fn is_empty(&self) -> bool {
        self.re.is_empty()
    }

    pub fn fill_zero(&mut self) {
        self.re.fill(S::zero());
        self.im.fill(S::zero());
    }

    pub fn as_split(&mut self) -> Split<'_, S> {
        Split::new(&mut self.re, &mut self.im)
    }

    /// Borrows the slot starting at `offset` of length `len` as a split view.
    pub fn slot(&mut self, offset: usize, len: usize) -> Split<'_, S> {
        Split::new(
            &mut self.re[offset..offset + len],
            &mut self.im[offset..offset + len],
        )
    }
}

/// Smallest and largest supported power-of-two FFT size, in log2 units.
pub const MIN_FFT_LOG2: u32 = 3;
pub const MAX_FFT_LOG2: u32 = 20;

/// `size.trailing_zeros()`, checked: rejects zero and any non-power-of-two.
pub fn checked_log2(size: usize) -> ConvolveResult<u32> {
    if size == 0 || !size.is_power_of_two() {
        return Err(ConvolveError::FftSizeNotPowerOfTwo);
    }
    Ok(size.trailing_zeros())
}

/// Immutable table of twiddle factors, shared read-only by every
/// engine instance. `cos[j]`/`sin[j]` hold `cos(2*pi*j/N_max)` /
/// `sin(2*pi*j/N_max)` for `j` in `0..N_max/2`; smaller transform
/// sizes subsample this table at a stride of `N_max/N`, which is
/// exact because every supported size is a power of two.
pub struct Setup<S> {
    max_log2: u32,
    cos: AlignedVec<S>,
    sin: AlignedVec<S>,
}

impl<S: Sample> Setup<S> {
    /// Builds twiddle tables for every size from `2^3` up to `2^max_log2`.
    /// Returns `None` only if `max_log2` is outside `[MIN_FFT_LOG2, MAX_FFT_LOG2]`.
    pub fn new(max_log2: u32) -> Option<Self> {
        if !(MIN_FFT_LOG2..=MAX_FFT_LOG2).contains(&max_log2) {
            return None;
        }
        let n_max = 1usize << max_log2;
        let half = n_max / 2;
        let mut cos = AlignedVec::<S>::zeroed(half);
        let mut sin = AlignedVec::<S>::zeroed(half);
        for j in 0..half {
            let angle = 2.0 * std::f64::consts::PI * (j as f64) / (n_max as f64);
            cos[j] = sample::from_f64(angle.cos());
            sin[j] = sample::from_f64(angle.sin());
        }
        Some(Self { max_log2, cos, sin })
    }

    pub fn max_log2(&self) -> u32 {
        self.max_log2
    }

    /// `cos(2*pi*k/2^log2n)`, `sin(2*pi*k/2^log2n)` for any `k` in `0..2^log2n/2`.
    #[inline]
    fn twiddle(&self, log2n: u32, k: usize) -> (S, S) {
        let stride = 1usize << (self.max_log2 - log2n);
        let idx = k * stride;
        (self.cos[idx], self.sin[idx])
    }
}

/// Bit-reverses the low `log2n` bits of `i`.
#[inline]
fn reverse_bits(mut i: usize, log2n: u32) -> usize {
    let mut r = 0usize;
    for _ in 0..log2n {
        r = (r << 1) | (i & 1);
        i >>= 1;
    }
    r
}

fn bit_reverse_permute<S: Sample>(split: &mut Split<'_, S>, log2n: u32) {
    let n = split.len();
    for i in 0..n {
        let j = reverse_bits(i, log2n);
        if j > i {
            split.re.swap(i, j);
            split.im.swap(i, j);
        }
    }
}

/// In-place forward complex FFT, unscaled: `ifft(fft(x)) == N*x`.
/// Iterative radix-2 decimation-in-time: digit-reverse reorder
/// followed by butterfly passes reading twiddles from `setup`. No-op
/// (returns without touching `split`) if `log2n` is out of range or
/// `split.len() != 2^log2n`.
pub fn fft<S: Sample>(setup: &Setup<S>, split: &mut Split<'_, S>, log2n: u32) {
    transform(setup, split, log2n, false);
}

/// In-place inverse complex FFT, unscaled (see [`fft`]).
pub fn ifft<S: Sample>(setup: &Setup<S>, split: &mut Split<'_, S>, log2n: u32) {
    transform(setup, split, log2n, true);
}

fn transform<S: Sample>(setup: &Setup<S>, split: &mut Split<'_, S>, log2n: u32, inverse: bool) {
    if log2n == 0 || log2n > setup.max_log2 {
        return;
    }
    let n = 1usize << log2n;
    if split.len() != n {
        return;
    }

    bit_reverse_permute(split, log2n);

    let mut size = 2usize;
    while size <= n {
        let half = size >> 1;
        let stage_log2 = size.trailing_zeros();
        let mut start = 0usize;
        while start < n {
            for j in 0..half {
                let (c, s) = setup.twiddle(stage_log2, j);
                let ia = start + j;
                let ib = ia + half;

                let are = split.re[ia];
                let aim = split.im[ia];
                let bre = split.re[ib];
                let bim = split.im[ib];

                // Forward twiddle is (c - i*s); inverse is its conjugate (c + i*s).
                let (tre, tim) = if inverse {
                    (c * bre - s * bim, c * bim + s * bre)
                } else {
                    (c * bre + s * bim, c * bim - s * bre)
                };

                split.re[ia] = are + tre;
                split.im[ia] = aim + tim;
                split.re[ib] = are - tre;
                split.im[ib] = aim - tim;
            }
            start += size;
        }
        size <<= 1;
    }
}

/// Packs a real buffer of length `2^log2n` into a split-complex buffer
/// of half that length: `split.re[n] = real[2n]`, `split.im[n] =
/// real[2n+1]`. If `real` is shorter than `2^log2n` the remainder is
/// zero-padded.
pub fn unzip<S: Sample>(real: &[S], split: &mut Split<'_, S>, log2n: u32) {
    let n = 1usize << log2n;
    let half = n / 2;
    debug_assert_eq!(split.len(), half);
    for k in 0..half {
        let i0 = 2 * k;
        let i1 = 2 * k + 1;
        split.re[k] = if i0 < real.len() { real[i0] } else { S::zero() };
        split.im[k] = if i1 < real.len() { real[i1] } else { S::zero() };
    }
}

/// Inverse of [`unzip`]: interleaves a split-complex buffer of length
/// `2^log2n/2` back into a real buffer of length `2^log2n`.
pub fn zip<S: Sample>(split: &Split<'_, S>, real: &mut [S], log2n: u32) {
    let n = 1usize << log2n;
    let half = n / 2;
    debug_assert_eq!(split.len(), half);
    debug_assert!(real.len() >= n);
    for k in 0..half {
        real[2 * k] = split.re[k];
        real[2 * k + 1] = split.im[k];
    }
}

/// In-place real forward FFT on the `N/2`-length packed buffer
/// produced by [`unzip`]: a half-size complex FFT followed by the
/// post-processing pass that unpacks conjugate-symmetric bins into the
/// true real spectrum, with the Nyquist bin packed into `im[0]` (see
/// [`rfft`'s module docs](self) and [`rifft`]).
pub fn rfft<S: Sample>(setup: &Setup<S>, split: &mut Split<'_, S>, log2n: u32) {
    if log2n < 1 || log2n > setup.max_log2 {
        return;
    }
    let m = (1usize << log2n) / 2;
    if split.len() != m {
        return;
    }

    fft(setup, split, log2n - 1);

    let two: S = sample::from_f64(2.0);

    if m == 1 {
        // N == 2: the single complex bin already *is* (DC, Nyquist).
        let re = split.re[0];
        let im = split.im[0];
        split.re[0] = (re + im) * two;
        split.im[0] = (re - im) * two;
        return;
    }

    let half_m = m / 2;
    for k in 1..=half_m {
        let mk = m - k;
        let (a_re, a_im) = (split.re[k], split.im[k]);
        let (b_re, b_im) = (split.re[mk], split.im[mk]);

        let sum_re = a_re + b_re;
        let sum_im = a_im - b_im;
        let diff_re = a_re - b_re;
        let diff_im = a_im + b_im;

        let (c, s) = setup.twiddle(log2n, k);
        let half: S = sample::from_f64(0.5);
        let term_re = half * (c * diff_im - s * diff_re);
        let term_im = -half * (c * diff_re + s * diff_im);

        let xk_re = half * sum_re + term_re;
        let xk_im = half * sum_im + term_im;

        if k == mk {
            // Self-paired midpoint bin (N/4): one complex value, one equation.
            split.re[k] = xk_re;
            split.im[k] = xk_im;
            continue;
        }

        let (c2, s2) = setup.twiddle(log2n, mk);
        let sum2_re = b_re + a_re;
        let sum2_im = b_im - a_im;
        let diff2_re = b_re - a_re;
        let diff2_im = b_im + a_im;
        let term2_re = half * (c2 * diff2_im - s2 * diff2_re);
        let term2_im = -half * (c2 * diff2_re + s2 * diff2_im);

        split.re[k] = xk_re;
        split.im[k] = xk_im;
        split.re[mk] = half * sum2_re + term2_re;
        split.im[mk] = half * sum2_im + term2_im;
    }

    let (dc, nyq) = (split.re[0], split.im[0]);
    split.re[0] = dc + nyq;
    split.im[0] = dc - nyq;

    for k in 0..m {
        split.re[k] = split.re[k] * two;
        split.im[k] = split.im[k] * two;
    }
}

/// In-place real inverse FFT, the exact algebraic inverse of [`rfft`]'s
/// post-processing pass followed by a half-size inverse complex FFT.
/// Unscaled, like [`ifft`]: `rifft(rfft(x))` recovers `x` scaled by the
/// same constant `fft`/`ifft` use for the half-size transform (see the
/// module-level round-trip test).
pub fn rifft<S: Sample>(setup: &Setup<S>, split: &mut Split<'_, S>, log2n: u32) {
    if log2n < 1 || log2n > setup.max_log2 {
        return;
    }
    let m = (1usize << log2n) / 2;
    if split.len() != m {
        return;
    }

    let two: S = sample::from_f64(2.0);
    for k in 0..m {
        split.re[k] = split.re[k] * two;
        split.im[k] = split.im[k] * two;
    }

    if m == 1 {
        let dc = split.re[0];
        let nyq = split.im[0];
        let half: S = sample::from_f64(0.5);
        split.re[0] = half * (dc + nyq);
        split.im[0] = half * (dc - nyq);
        ifft(setup, split, log2n - 1);
        return;
    }

    let (dc, nyq) = (split.re[0], split.im[0]);
    let half: S = sample::from_f64(0.5);
    split.re[0] = half * (dc + nyq);
    split.im[0] = half * (dc - nyq);

    let half_m = m / 2;
    for k in 1..=half_m {
        let mk = m - k;
        let (xk_re, xk_im) = (split.re[k], split.im[k]);
        let (c, s) = setup.twiddle(log2n, k);

        if k == mk {
            // Zk = conj(Xk) for the self-paired midpoint bin.
            split.re[k] = xk_re;
            split.im[k] = -xk_im;
            continue;
        }

        let (xmk_re, xmk_im) = (split.re[mk], split.im[mk]);

        // P = A + conj(B) = Xk + conj(Xmk)
        let p_re = xk_re + xmk_re;
        let p_im = xk_im - xmk_im;

        // Q = A - conj(B) = -i*(c + i*s)*(conj(Xmk) - Xk)
        let d_re = xmk_re - xk_re; // conj(Xmk) - Xk, real part
        let d_im = -xmk_im - xk_im; // conj(Xmk) - Xk, imag part
        // (c + i*s) * (d_re + i*d_im)
        let w_re = c * d_re - s * d_im;
        let w_im = c * d_im + s * d_re;
        // -i * (w_re + i*w_im) = w_im - i*w_re
        let q_re = w_im;
        let q_im = -w_re;

        let a_re = half * (p_re + q_re);
        let a_im = half * (p_im + q_im);
        let b_re = half * (p_re - q_re);
        let b_im = -half * (p_im - q_im);

        split.re[k] = a_re;
        split.im[k] = a_im;
        split.re[mk] = b_re;
        split.im[mk] = b_im;
    }

    ifft(setup, split, log2n - 1);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive_dft(re: &[f64], im: &[f64], inverse: bool) -> (Vec<f64>, Vec<f64>) {
        let n = re.len();
        let sign = if inverse { 1.0 } else { -1.0 };
        let mut out_re = vec![0.0; n];
        let mut out_im = vec![0.0; n];
        for k in 0..n {
            let mut sum_re = 0.0;
            let mut sum_im = 0.0;
            for j in 0..n {
                let angle = sign * 2.0 * std::f64::consts::PI * (k * j) as f64 / n as f64;
                let (s, c) = angle.sin_cos();
                sum_re += re[j] * c - im[j] * s;
                sum_im += re[j] * s + im[j] * c;
            }
            out_re[k] = sum_re;
            out_im[k] = sum_im;
        }
        (out_re, out_im)
    }

    #[test]
    fn forward_fft_matches_naive_dft() {
        let log2n = 6u32;
        let n = 1usize << log2n;
        let setup = Setup::<f64>::new(log2n).unwrap();

        let re_in: Vec<f64> = (0..n).map(|i| (i as f64 * 0.37).sin()).collect();
        let im_in: Vec<f64> = (0..n).map(|i| (i as f64 * 0.11).cos()).collect();

        let (expect_re, expect_im) = naive_dft(&re_in, &im_in, false);

        let mut re = re_in.clone();
        let mut im = im_in.clone();
        let mut split = Split::new(&mut re, &mut im);
        fft(&setup, &mut split, log2n);

        for i in 0..n {
            assert!((re[i] - expect_re[i]).abs() < 1e-8, "re[{i}]");
            assert!((im[i] - expect_im[i]).abs() < 1e-8, "im[{i}]");
        }
    }

    #[test]
    fn complex_round_trip_scales_by_n() {
        let log2n = 8u32;
        let n = 1usize << log2n;
        let setup = Setup::<f64>::new(log2n).unwrap();

        let mut re: Vec<f64> = (0..n).map(|i| (i as f64).sin()).collect();
        let mut im: Vec<f64> = (0..n).map(|i| (i as f64 * 0.5).cos()).collect();
        let orig_re = re.clone();
        let orig_im = im.clone();

        {
            let mut split = Split::new(&mut re, &mut im);
            fft(&setup, &mut split, log2n);
            ifft(&setup, &mut split, log2n);
        }

        for i in 0..n {
            assert!((re[i] - orig_re[i] * n as f64).abs() < 1e-6);
            assert!((im[i] - orig_im[i] * n as f64).abs() < 1e-6);
        }
    }

    #[test]
    fn zip_unzip_round_trip() {
        let log2n = 7u32;
        let n = 1usize << log2n;
        let real: Vec<f64> = (0..n).map(|i| i as f64 * 0.01).collect();

        let mut re = vec![0.0; n / 2];
        let mut im = vec![0.0; n / 2];
        let mut split = Split::new(&mut re, &mut im);
        unzip(&real, &mut split, log2n);

        let mut out = vec![0.0; n];
        zip(&split, &mut out, log2n);

        assert_eq!(real, out);
    }

    #[test]
    fn real_fft_dc_and_nyquist_bins() {
        let log2n = 6u32;
        let n = 1usize << log2n;
        let setup = Setup::<f64>::new(log2n).unwrap();

        // A constant signal has all its energy in the DC bin.
        let real = vec![1.0f64; n];
        let mut re = vec![0.0; n / 2];
        let mut im = vec![0.0; n / 2];
        let mut split = Split::new(&mut re, &mut im);
        unzip(&real, &mut split, log2n);
        rfft(&setup, &mut split, log2n);

        assert!((split.re[0] - 2.0 * n as f64).abs() < 1e-8);
        assert!(split.im[0].abs() < 1e-8); // Nyquist bin is zero.
    }

    #[test]
    fn real_round_trip_is_self_consistent() {
        for log2n in [3u32, 4, 6, 9] {
            let n = 1usize << log2n;
            let setup = Setup::<f64>::new(log2n.max(MIN_FFT_LOG2)).unwrap();

            let real: Vec<f64> = (0..n).map(|i| ((i * 7 + 3) % 11) as f64 - 5.0).collect();
            let mut re = vec![0.0; n / 2];
            let mut im = vec![0.0; n / 2];
            {
                let mut split = Split::new(&mut re, &mut im);
                unzip(&real, &mut split, log2n);
                rfft(&setup, &mut split, log2n);
                rifft(&setup, &mut split, log2n);
            }
            let mut out = vec![0.0; n];
            let split = Split::new(&mut re, &mut im);
            zip(&split, &mut out, log2n);

            // The ×2 scale in both rfft and rifft compounds with the
            // half-size complex fft/ifft pair's own M = N/2 scale.
            let scale = 2.0 * n as f64;
            for i in 0..n {
                assert!(
                    (out[i] - real[i] * scale).abs() < 1e-6,
                    "log2n={log2n} i={i} out={} expect={}",
                    out[i],
                    real[i] * scale
                );
            }
        }
    }
}
