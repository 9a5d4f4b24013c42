//! The floating-point sample abstraction shared by every engine.
//!
//! Internal computation uses the impulse response's type `S`; the
//! caller's input/output buffers may use a distinct `IO` type and are
//! converted at the boundary only (never inside a per-bin hot loop).

/// A sample type usable as the internal compute type of a convolver.
///
/// Implemented for `f32` and `f64` via a blanket impl over
/// [`num_traits::Float`]: every arithmetic method used in this crate
/// (`zero`, `one`, `abs`, `sqrt`, ...) already comes from that trait's
/// supertraits, so this one stays a plain marker rather than
/// redeclaring them under new names.
pub trait Sample:
    num_traits::Float + Default + std::ops::AddAssign + std::iter::Sum + Send + Sync + 'static
{
}

impl<T> Sample for T where
    T: num_traits::Float + Default + std::ops::AddAssign + std::iter::Sum + Send + Sync + 'static
{
}

/// Converts an `f64` constant (a twiddle factor, a scale) into a
/// convolver's internal compute type `S`.
#[inline]
pub fn from_f64<S: Sample>(v: f64) -> S {
    num_traits::NumCast::from(v).unwrap_or_else(S::zero)
}

/// Widens a compute-type sample out to `f64`, e.g. to report latency
/// or other control-path quantities independent of `S`.
#[inline]
pub fn to_f64<S: Sample>(v: S) -> f64 {
    num_traits::ToPrimitive::to_f64(&v).unwrap_or(0.0)
}

/// Converts a caller-supplied `IO` sample into the engine's internal
/// compute type `S`, at the boundary of a `process` call.
#[inline]
pub fn convert_in<IO: Sample, S: Sample>(v: IO) -> S {
    from_f64(to_f64(v))
}

/// Converts an internal compute-type sample back to the caller's `IO`
/// type when writing an output buffer.
#[inline]
pub fn convert_out<S: Sample, IO: Sample>(v: S) -> IO {
    from_f64(to_f64(v))
}
