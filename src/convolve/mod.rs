//! Convolution engines, from a single fixed-size FFT partition up to a
//! full multichannel matrix.
//!
//! ```text
//! time_domain    -- direct FIR, zero latency, short IRs only
//! partitioned    -- one uniform overlap-save FFT partition size
//! mono           -- non-uniform chain of partitioned (+ time_domain) stages
//! n_to_mono      -- sums several mono convolvers into one output
//! multichannel   -- a matrix, or parallel bank, of n_to_mono convolvers
//! ```

pub mod mono;
pub mod multichannel;
pub mod n_to_mono;
pub mod partitioned;
pub mod time_domain;

pub use mono::{LatencyMode, MonoConvolver};
pub use multichannel::MultichannelConvolver;
pub use n_to_mono::NToMonoConvolver;
pub use partitioned::PartitionedConvolver;
pub use time_domain::TimeDomainConvolver;
