//! # Sliding Time Window Moving Averages
//!
//! Purpose: Report exact (undecayed) event rates over the last 1, 5, and 15
//! minutes using one counter per second.
//!
//! ## Design Principles
//! 1. **Fixed Ring**: 900 one-second buckets; memory never grows.
//! 2. **Lazy Cleanup**: Buckets that the window slid past are zeroed by the
//!    thread that wins the tick CAS, at most one full ring per catch-up.
//!
//! ```text
//! buckets: [ b0 | b1 | ... | current | stale ... ]
//!            <---- last N seconds ----|
//! rate(N) = sum(last N buckets) / N
//! ```

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::trace;

use smet_common::{Clock, NANOS_PER_SECOND};

use crate::moving_averages::MovingAverages;

/// Number of one-second buckets (15 minutes).
pub const NUMBER_OF_BUCKETS: usize = 15 * 60;

const BUCKET_NANOS: i64 = NANOS_PER_SECOND;

/// Windowed event counter exposing per-second rates.
pub struct SlidingTimeWindowMovingAverages {
    buckets: Box<[AtomicI64]>,
    current: AtomicUsize,
    /// Lower border of the current bucket.
    last_tick: AtomicI64,
    clock: Arc<dyn Clock>,
}

impl SlidingTimeWindowMovingAverages {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let start = clock.tick();
        SlidingTimeWindowMovingAverages {
            buckets: (0..NUMBER_OF_BUCKETS).map(|_| AtomicI64::new(0)).collect(),
            current: AtomicUsize::new(0),
            last_tick: AtomicI64::new(start),
            clock,
        }
    }

    /// Sums the `seconds` most recent buckets, the current one included.
    fn sum_recent(&self, seconds: usize) -> i64 {
        let current = self.current.load(Ordering::Acquire);
        (0..seconds.min(NUMBER_OF_BUCKETS))
            .map(|back| {
                let idx = (current + NUMBER_OF_BUCKETS - back) % NUMBER_OF_BUCKETS;
                self.buckets[idx].load(Ordering::Relaxed)
            })
            .sum()
    }

    fn minute_rate(&self, minutes: usize) -> f64 {
        self.tick_if_necessary();
        let seconds = minutes * 60;
        self.sum_recent(seconds) as f64 / seconds as f64
    }
}

impl MovingAverages for SlidingTimeWindowMovingAverages {
    fn tick_if_necessary(&self) {
        let old_tick = self.last_tick.load(Ordering::Acquire);
        let new_tick = self.clock.tick();
        let age = new_tick.wrapping_sub(old_tick);
        if age < BUCKET_NANOS {
            return;
        }

        let new_last_tick = new_tick.wrapping_sub(age % BUCKET_NANOS);
        if self
            .last_tick
            .compare_exchange(old_tick, new_last_tick, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let advance = (age / BUCKET_NANOS) as u64;
        let cleared = advance.min(NUMBER_OF_BUCKETS as u64) as usize;
        let old = self.current.load(Ordering::Acquire);
        for step in 1..=cleared {
            self.buckets[(old + step) % NUMBER_OF_BUCKETS].store(0, Ordering::Relaxed);
        }
        let next = (old as u64 + advance % NUMBER_OF_BUCKETS as u64) as usize % NUMBER_OF_BUCKETS;
        self.current.store(next, Ordering::Release);
        trace!(advance, cleared, "sliding window averages advanced");
    }

    fn update(&self, n: i64) {
        self.tick_if_necessary();
        let current = self.current.load(Ordering::Acquire);
        self.buckets[current].fetch_add(n, Ordering::Relaxed);
    }

    fn m1_rate(&self) -> f64 {
        self.minute_rate(1)
    }

    fn m5_rate(&self) -> f64 {
        self.minute_rate(5)
    }

    fn m15_rate(&self) -> f64 {
        self.minute_rate(15)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smet_common::ManualClock;

    fn averages() -> (Arc<ManualClock>, SlidingTimeWindowMovingAverages) {
        let clock = Arc::new(ManualClock::new());
        let averages = SlidingTimeWindowMovingAverages::new(clock.clone());
        (clock, averages)
    }

    #[test]
    fn test_rates_cover_their_windows() {
        let (clock, averages) = averages();
        averages.update(60);

        assert!((averages.m1_rate() - 1.0).abs() < 1e-12);
        assert!((averages.m5_rate() - 0.2).abs() < 1e-12);
        assert!((averages.m15_rate() - 60.0 / 900.0).abs() < 1e-12);

        clock.add_seconds(59);
        assert!((averages.m1_rate() - 1.0).abs() < 1e-12);

        clock.add_seconds(1);
        assert_eq!(averages.m1_rate(), 0.0);
        assert!((averages.m5_rate() - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_events_leave_after_fifteen_minutes() {
        let (clock, averages) = averages();
        averages.update(10);
        clock.add_seconds(30);
        averages.update(20);

        clock.add_minutes(14);
        assert!((averages.m15_rate() - 30.0 / 900.0).abs() < 1e-12);

        clock.add_seconds(30);
        assert!((averages.m15_rate() - 20.0 / 900.0).abs() < 1e-12);

        clock.add_seconds(30);
        assert_eq!(averages.m15_rate(), 0.0);
    }

    #[test]
    fn test_long_gap_clears_everything() {
        let (clock, averages) = averages();
        averages.update(500);
        clock.add_hours(10_000);
        assert_eq!(averages.m15_rate(), 0.0);

        averages.update(9);
        assert!((averages.m1_rate() - 9.0 / 60.0).abs() < 1e-12);
    }

    #[test]
    fn test_sub_second_updates_share_a_bucket() {
        let (clock, averages) = averages();
        for _ in 0..10 {
            averages.update(6);
            clock.add_millis(50);
        }
        assert_eq!(averages.sum_recent(1), 60);
    }
}
