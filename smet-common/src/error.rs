//! # Error Types
//!
//! Purpose: One error enum shared by every crate in the workspace.
//!
//! ## Design Principles
//!
//! 1. **Fail Fast on Construction**: Misconfiguration (capacity, window,
//!    alpha) is rejected before a reservoir exists, never at update time.
//! 2. **Local Query Errors**: An invalid quantile fails only that call and
//!    leaves the sampled state untouched.
//! 3. **Stable Codes**: `code()` maps each variant to a fixed negative
//!    integer for callers that export numeric status.

use thiserror::Error;

/// Result alias used across the workspace.
pub type SmetResult<T> = Result<T, SmetError>;

/// Errors surfaced by reservoirs, snapshots, and rate estimators.
#[derive(Debug, Error)]
pub enum SmetError {
    /// Reservoir capacity must be at least one sample.
    #[error("capacity must be positive, got {0}")]
    InvalidCapacity(usize),

    /// Chunk size for the chunked array must be at least one entry.
    #[error("chunk size must be positive, got {0}")]
    InvalidChunkSize(usize),

    /// Time window is zero or does not fit in signed nanoseconds.
    #[error("time window must be positive and fit in i64 nanoseconds")]
    InvalidWindow,

    /// Decay factor is NaN, infinite, or not positive.
    #[error("alpha must be a positive finite number, got {0}")]
    InvalidAlpha(f64),

    /// Tick interval is zero or does not fit in signed nanoseconds.
    #[error("tick interval must be positive and fit in i64 nanoseconds")]
    InvalidInterval,

    /// Rescale threshold is zero, or large enough that decay weights overflow.
    #[error("rescale threshold must be positive and keep exp(alpha * threshold) finite")]
    InvalidRescaleThreshold,

    /// Quantile is NaN or outside `[0, 1]`.
    #[error("{0} is not in [0..1]")]
    InvalidQuantile(f64),

    /// Writing a snapshot dump failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SmetError {
    /// Returns the stable numeric code for this error.
    pub fn code(&self) -> i32 {
        match self {
            SmetError::InvalidCapacity(_) => -1,
            SmetError::InvalidChunkSize(_) => -2,
            SmetError::InvalidWindow => -3,
            SmetError::InvalidAlpha(_) => -4,
            SmetError::InvalidInterval => -5,
            SmetError::InvalidRescaleThreshold => -6,
            SmetError::InvalidQuantile(_) => -7,
            SmetError::Io(_) => -8,
        }
    }

    /// Returns true for construction-time misconfiguration.
    pub fn is_config(&self) -> bool {
        !matches!(self, SmetError::InvalidQuantile(_) | SmetError::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct() {
        let errors = [
            SmetError::InvalidCapacity(0),
            SmetError::InvalidChunkSize(0),
            SmetError::InvalidWindow,
            SmetError::InvalidAlpha(f64::NAN),
            SmetError::InvalidInterval,
            SmetError::InvalidRescaleThreshold,
            SmetError::InvalidQuantile(2.0),
            SmetError::Io(std::io::Error::new(std::io::ErrorKind::Other, "sink")),
        ];
        let mut codes: Vec<i32> = errors.iter().map(SmetError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_quantile_message() {
        let err = SmetError::InvalidQuantile(1.5);
        assert_eq!(err.to_string(), "1.5 is not in [0..1]");
        assert!(!err.is_config());
        assert!(SmetError::InvalidCapacity(0).is_config());
    }
}
