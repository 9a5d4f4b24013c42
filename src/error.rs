//! Control-path error taxonomy.
//!
//! Every fallible operation in this crate lives on the control path
//! (`set`, `resize`, `reset`, construction). `process` never returns an
//! error: a convolver with no usable IR, or one whose resizable
//! partition is momentarily locked by a concurrent `set`, simply emits
//! silence for that call (see [`crate::convolve::mono::MonoConvolver::process`]).

use thiserror::Error;

/// Recoverable control-path error. Never corrupts convolver state: on
/// any variant below the convolver is left exactly as documented by the
/// call that produced it (unchanged, clamped, or emptied).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConvolveError {
    #[error("input channel index out of range")]
    InChannelOutOfRange,
    #[error("output channel index out of range")]
    OutChannelOutOfRange,
    #[error("time-domain impulse response longer than the 2044-sample cap")]
    TimeImpulseTooLong,
    #[error("time-domain convolver length out of range")]
    TimeLengthOutOfRange,
    #[error("fft size outside the supported [32, 2^20] range")]
    FftSizeOutOfRange,
    #[error("fft size is not a power of two")]
    FftSizeNotPowerOfTwo,
    #[error("impulse response longer than the resizable stage's current capacity; loaded a truncated prefix")]
    MemoryAllocTooSmall,
    #[error("resizable stage's backing memory is unavailable (no buffer allocated, or allocation failed)")]
    MemoryUnavailable,
}

/// Result alias used throughout the control path.
pub type ConvolveResult<T = ()> = Result<T, ConvolveError>;
