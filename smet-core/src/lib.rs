//! # SampledMetrics Core
//!
//! Purpose: Maintain bounded-memory, statistically valid summaries of an
//! unbounded, concurrently written stream of `i64` observations, and the
//! decayed event rates that accompany them.
//!
//! ## Design Principles
//! 1. **Callers Own the Threads**: No component spawns work; `update` runs on
//!    producer threads, reads run on whatever thread reports.
//! 2. **Atomics First**: Single-word state uses CAS loops; locks guard only
//!    multi-word structure (chunk lists, priority maps, rescale).
//! 3. **Injected Time**: Everything time-aware takes an `Arc<dyn Clock>`.
//! 4. **Total Reads**: Snapshots never yield NaN; empty input reads as zero.

pub mod chunked;
pub mod config;
pub mod ewma;
pub mod moving_averages;
pub mod reservoir;
pub mod snapshot;
pub mod window_averages;

pub use chunked::ChunkedAssociativeArray;
pub use config::{RateConfig, ReservoirConfig};
pub use ewma::Ewma;
pub use moving_averages::{ExponentialMovingAverages, MovingAverages};
pub use reservoir::{
    DecayingReservoirBuilder, ExponentiallyDecayingReservoir, Reservoir, SlidingTimeWindowReservoir,
    SlidingWindowReservoir, UniformReservoir,
};
pub use snapshot::{Snapshot, UniformSnapshot, WeightedSample, WeightedSnapshot};
pub use window_averages::SlidingTimeWindowMovingAverages;
