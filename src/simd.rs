//! SIMD abstraction, aligned allocation, and the denormals-off guard.
//!
//! The vector type itself is borrowed from [`wide`], which already
//! picks the best available backend (SSE/NEON/AVX) for the lane widths
//! it exposes and falls back to scalar emulation where the target has
//! none. What this module adds on top is the piece `wide` does not
//! provide: a [`Lane`] trait that lets the rest of the crate write one
//! generic bin-loop body for both `f32` and `f64`, plus the
//! aligned-allocation and denormal-control primitives the convolution
//! engines need directly.

use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use wide::{f32x4, f64x2};

use crate::sample::Sample;

/// Byte alignment used for every buffer the audio-path engines touch.
/// Wide enough for the widest lane width this crate dispatches to.
pub const SIMD_ALIGN: usize = 32;

/// A fixed-width SIMD lane of 4 (`f32`) or 2 (`f64`) values, with the
/// handful of horizontal operations the convolution kernels need.
/// Narrower than the hardware maximum on some targets; `wide` itself
/// is what actually widens to AVX under the hood when compiled for it.
pub trait Lane: Sample {
    /// Number of scalars packed in one lane for this sample type.
    const WIDTH: usize;

    /// Dot product of two equal-length slices, any length (the tail
    /// that doesn't fill a whole lane is summed scalar).
    fn dot(a: &[Self], b: &[Self]) -> Self;

    /// `acc += a * b` elementwise in place, any length.
    fn mac(acc: &mut [Self], a: &[Self], b: &[Self]);

    /// Elementwise scale in place: `buf *= scale`.
    fn scale(buf: &mut [Self], scale: Self);
}

impl Lane for f32 {
    const WIDTH: usize = 4;

    #[inline]
    fn dot(a: &[Self], b: &[Self]) -> Self {
        debug_assert_eq!(a.len(), b.len());
        let chunks = a.len() / 4;
        let mut acc = f32x4::ZERO;
        for i in 0..chunks {
            let va = f32x4::from(<[f32; 4]>::try_from(&a[i * 4..i * 4 + 4]).unwrap());
            let vb = f32x4::from(<[f32; 4]>::try_from(&b[i * 4..i * 4 + 4]).unwrap());
            acc += va * vb;
        }
        let mut total: f32 = acc.to_array().iter().sum();
        for i in chunks * 4..a.len() {
            total += a[i] * b[i];
        }
        total
    }

    #[inline]
    fn mac(acc: &mut [Self], a: &[Self], b: &[Self]) {
        debug_assert_eq!(acc.len(), a.len());
        debug_assert_eq!(acc.len(), b.len());
        let chunks = acc.len() / 4;
        for i in 0..chunks {
            let idx = i * 4;
            let va = f32x4::from(<[f32; 4]>::try_from(&a[idx..idx + 4]).unwrap());
            let vb = f32x4::from(<[f32; 4]>::try_from(&b[idx..idx + 4]).unwrap());
            let vacc = f32x4::from(<[f32; 4]>::try_from(&acc[idx..idx + 4]).unwrap());
            let out = (vacc + va * vb).to_array();
            acc[idx..idx + 4].copy_from_slice(&out);
        }
        for i in chunks * 4..acc.len() {
            acc[i] += a[i] * b[i];
        }
    }

    #[inline]
    fn scale(buf: &mut [Self], scale: Self) {
        let chunks = buf.len() / 4;
        let vs = f32x4::splat(scale);
        for i in 0..chunks {
            let idx = i * 4;
            let v = f32x4::from(<[f32; 4]>::try_from(&buf[idx..idx + 4]).unwrap());
            buf[idx..idx + 4].copy_from_slice(&(v * vs).to_array());
        }
        for x in &mut buf[chunks * 4..] {
            *x *= scale;
        }
    }
}

impl Lane for f64 {
    const WIDTH: usize = 2;

    #[inline]
    fn dot(a: &[Self], b: &[Self]) -> Self {
        debug_assert_eq!(a.len(), b.len());
        let chunks = a.len() / 2;
        let mut acc = f64x2::ZERO;
        for i in 0..chunks {
            let va = f64x2::from(<[f64; 2]>::try_from(&a[i * 2..i * 2 + 2]).unwrap());
            let vb = f64x2::from(<[f64; 2]>::try_from(&b[i * 2..i * 2 + 2]).unwrap());
            acc += va * vb;
        }
        let mut total: f64 = acc.to_array().iter().sum();
        for i in chunks * 2..a.len() {
            total += a[i] * b[i];
        }
        total
    }

    #[inline]
    fn mac(acc: &mut [Self], a: &[Self], b: &[Self]) {
        debug_assert_eq!(acc.len(), a.len());
        let chunks = acc.len() / 2;
        for i in 0..chunks {
            let idx = i * 2;
            let va = f64x2::from(<[f64; 2]>::try_from(&a[idx..idx + 2]).unwrap());
            let vb = f64x2::from(<[f64; 2]>::try_from(&b[idx..idx + 2]).unwrap());
            let vacc = f64x2::from(<[f64; 2]>::try_from(&acc[idx..idx + 2]).unwrap());
            let out = (vacc + va * vb).to_array();
            acc[idx..idx + 2].copy_from_slice(&out);
        }
        for i in chunks * 2..acc.len() {
            acc[i] += a[i] * b[i];
        }
    }

    #[inline]
    fn scale(buf: &mut [Self], scale: Self) {
        let chunks = buf.len() / 2;
        let vs = f64x2::splat(scale);
        for i in 0..chunks {
            let idx = i * 2;
            let v = f64x2::from(<[f64; 2]>::try_from(&buf[idx..idx + 2]).unwrap());
            buf[idx..idx + 2].copy_from_slice(&(v * vs).to_array());
        }
        for x in &mut buf[chunks * 2..] {
            *x *= scale;
        }
    }
}

/// Heap buffer aligned to [`SIMD_ALIGN`] bytes, zero-initialized.
/// Used for every buffer an engine allocates in `new`/`resize` so the
/// FFT and dot-product kernels can assume aligned access.
pub struct AlignedVec<T> {
    ptr: NonNull<T>,
    len: usize,
    layout: Layout,
}

unsafe impl<T: Send> Send for AlignedVec<T> {}
unsafe impl<T: Sync> Sync for AlignedVec<T> {}

impl<T: Default + Copy> AlignedVec<T> {
    pub fn zeroed(len: usize) -> Self {
        let layout = Layout::from_size_align(len.max(1) * size_of::<T>(), SIMD_ALIGN)
            .expect("buffer too large to align");
        // SAFETY: layout has nonzero size (len.max(1)) and the returned
        // pointer is only ever read through this type's safe Deref impls.
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw.cast::<T>()).expect("allocation failure");
        Self { ptr, len, layout }
    }
}

impl<T> Deref for AlignedVec<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        // SAFETY: ptr is valid for len elements of T for the lifetime of self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl<T> DerefMut for AlignedVec<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        // SAFETY: ptr is valid for len elements of T, uniquely borrowed here.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl<T> Drop for AlignedVec<T> {
    fn drop(&mut self) {
        // SAFETY: ptr/layout match exactly what was passed to alloc_zeroed.
        unsafe { dealloc(self.ptr.as_ptr().cast(), self.layout) };
    }
}

/// RAII guard that flushes denormals to zero for its lifetime by
/// setting the FTZ/DAZ bits of the FPU control register, restoring the
/// previous value on drop. A no-op on targets without a known control
/// register (the kernels still produce correct, just slower, output).
pub struct DenormalGuard {
    #[cfg(target_arch = "x86_64")]
    saved_mxcsr: u32,
    #[cfg(target_arch = "aarch64")]
    saved_fpcr: u64,
}

/// FPCR flush-to-zero bit: flushes both input and output denormals for
/// every instruction issued while set.
#[cfg(target_arch = "aarch64")]
const FPCR_FZ: u64 = 1 << 24;

impl DenormalGuard {
    #[cfg(target_arch = "x86_64")]
    pub fn new() -> Self {
        use std::arch::x86_64::{_MM_FLUSH_ZERO_ON, _mm_getcsr, _mm_setcsr};
        // DAZ (Denormals Are Zero), MXCSR bit 6. Not exposed as a named
        // constant by std::arch, unlike _MM_FLUSH_ZERO_ON.
        const MXCSR_DAZ_ON: u32 = 0x0040;
        // SAFETY: _mm_getcsr/_mm_setcsr are available whenever SSE2 is,
        // which is guaranteed on every supported x86_64 target.
        unsafe {
            let saved = _mm_getcsr();
            _mm_setcsr(saved | _MM_FLUSH_ZERO_ON | MXCSR_DAZ_ON);
            Self { saved_mxcsr: saved }
        }
    }

    #[cfg(target_arch = "aarch64")]
    pub fn new() -> Self {
        // SAFETY: mrs/msr against fpcr are unprivileged on every aarch64
        // target this crate runs on; the asm! blocks touch no memory.
        unsafe {
            let saved: u64;
            std::arch::asm!("mrs {0}, fpcr", out(reg) saved);
            std::arch::asm!("msr fpcr, {0}", in(reg) saved | FPCR_FZ);
            Self { saved_fpcr: saved }
        }
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for DenormalGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_arch = "x86_64")]
impl Drop for DenormalGuard {
    fn drop(&mut self) {
        // SAFETY: restores a value this same thread previously read via _mm_getcsr.
        unsafe { std::arch::x86_64::_mm_setcsr(self.saved_mxcsr) };
    }
}

#[cfg(target_arch = "aarch64")]
impl Drop for DenormalGuard {
    fn drop(&mut self) {
        // SAFETY: restores a value this same thread previously read via mrs fpcr.
        unsafe { std::arch::asm!("msr fpcr, {0}", in(reg) self.saved_fpcr) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_product_matches_scalar_reference() {
        let a: Vec<f32> = (0..37).map(|i| i as f32 * 0.1).collect();
        let b: Vec<f32> = (0..37).map(|i| (37 - i) as f32 * 0.3).collect();
        let scalar: f32 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
        let simd = f32::dot(&a, &b);
        assert!((scalar - simd).abs() < 1e-3);
    }

    #[test]
    fn mac_matches_scalar_reference() {
        let a: Vec<f64> = (0..21).map(|i| i as f64 * 0.5).collect();
        let b: Vec<f64> = (0..21).map(|i| (21 - i) as f64 * 0.25).collect();
        let mut acc = vec![1.0f64; 21];
        let mut scalar_acc = acc.clone();

        f64::mac(&mut acc, &a, &b);
        for i in 0..21 {
            scalar_acc[i] += a[i] * b[i];
        }

        for (x, y) in acc.iter().zip(&scalar_acc) {
            assert!((x - y).abs() < 1e-9);
        }
    }

    #[test]
    fn aligned_vec_is_zeroed_and_aligned() {
        let v: AlignedVec<f32> = AlignedVec::zeroed(129);
        assert_eq!(v.len(), 129);
        assert!(v.iter().all(|&x| x == 0.0));
        assert_eq!((v.as_ptr() as usize) % SIMD_ALIGN, 0);
    }

    #[test]
    fn denormal_guard_round_trips() {
        let _guard = DenormalGuard::new();
        // Holding the guard must not itself corrupt arithmetic.
        let x = 1.0f32 / 3.0;
        assert!(x > 0.0);
    }
}
