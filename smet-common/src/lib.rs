// smet-common - Shared error types and clock abstraction for SampledMetrics
//
// This crate defines what every reservoir and rate estimator depends on

pub mod clock;
pub mod error;

// Re-export for convenience
pub use clock::*;
pub use error::*;
