//! # Reservoirs
//!
//! Purpose: Bounded-memory samples of an unbounded stream of observations.
//!
//! ## Variants
//! 1. **Uniform**: Algorithm R; every observation is equally likely retained.
//! 2. **Sliding Window**: The last `k` observations.
//! 3. **Sliding Time Window**: Everything observed in the last `window`.
//! 4. **Exponentially Decaying**: Forward-decay priority sample biased
//!    toward recent observations.

mod decaying;
mod sliding_time_window;
mod sliding_window;
mod uniform;

pub use decaying::{
    DecayingReservoirBuilder, ExponentiallyDecayingReservoir, DEFAULT_ALPHA,
    DEFAULT_RESCALE_THRESHOLD,
};
pub use sliding_time_window::SlidingTimeWindowReservoir;
pub use sliding_window::SlidingWindowReservoir;
pub use uniform::UniformReservoir;

use crate::snapshot::Snapshot;

/// Default capacity; with the default alpha this keeps a 99.9% confidence
/// level with a 5% margin of error.
pub const DEFAULT_CAPACITY: usize = 1028;

/// Sample contract consumed by histograms and timers.
///
/// Implementations are shared across producer threads and a reporter
/// thread, so every method takes `&self`.
pub trait Reservoir: Send + Sync {
    /// Absorbs one observation.
    fn update(&self, value: i64);

    /// Returns the number of retained observations.
    fn size(&self) -> usize;

    /// Returns a sorted, point-in-time copy of the retained observations.
    fn snapshot(&self) -> Snapshot;
}
