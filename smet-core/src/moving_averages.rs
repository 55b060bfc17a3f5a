//! # Moving Averages
//!
//! Purpose: Expose 1/5/15-minute event rates behind one contract so rate
//! producing metrics can swap estimators.
//!
//! ## Design Principles
//! 1. **Lazy Ticking**: No timer thread; every update and read first catches
//!    the estimator up to the clock.
//! 2. **Single Ticker**: A CAS on `last_tick` elects exactly one thread to
//!    apply the elapsed ticks.
//! 3. **Whole Intervals Only**: Partial intervals stay pending; `last_tick`
//!    is moved to the start of the current interval, not to `now`.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use smet_common::{Clock, NANOS_PER_SECOND};

use crate::ewma::{Ewma, TICK_INTERVAL};

/// Idle ticks beyond which a catch-up is logged.
const CATCH_UP_LOG_TICKS: i64 = 12 * 60;

/// Rate-estimator contract consumed by meters and timers.
///
/// All rates are events per second.
pub trait MovingAverages: Send + Sync {
    /// Applies any whole tick intervals elapsed since the last tick.
    fn tick_if_necessary(&self);

    /// Records `n` events.
    fn update(&self, n: i64);

    fn m1_rate(&self) -> f64;

    fn m5_rate(&self) -> f64;

    fn m15_rate(&self) -> f64;
}

/// Three EWMAs ticked every five seconds.
pub struct ExponentialMovingAverages {
    m1: Ewma,
    m5: Ewma,
    m15: Ewma,
    last_tick: AtomicI64,
    clock: Arc<dyn Clock>,
}

impl ExponentialMovingAverages {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let start = clock.tick();
        ExponentialMovingAverages {
            m1: Ewma::one_minute(),
            m5: Ewma::five_minute(),
            m15: Ewma::fifteen_minute(),
            last_tick: AtomicI64::new(start),
            clock,
        }
    }

    fn interval_nanos() -> i64 {
        TICK_INTERVAL.as_secs() as i64 * NANOS_PER_SECOND
    }
}

impl MovingAverages for ExponentialMovingAverages {
    fn tick_if_necessary(&self) {
        let interval = Self::interval_nanos();
        let old_tick = self.last_tick.load(Ordering::Acquire);
        let new_tick = self.clock.tick();
        let age = new_tick.wrapping_sub(old_tick);
        if age < interval {
            return;
        }

        let new_interval_start = new_tick.wrapping_sub(age % interval);
        if self
            .last_tick
            .compare_exchange(old_tick, new_interval_start, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // Another thread won the race and is applying these ticks.
            return;
        }

        let required = age / interval;
        if required > CATCH_UP_LOG_TICKS {
            debug!(ticks = required, "moving averages catching up after idle period");
        }
        let required = required as u64;
        self.m1.tick_n(required);
        self.m5.tick_n(required);
        self.m15.tick_n(required);
    }

    fn update(&self, n: i64) {
        self.tick_if_necessary();
        self.m1.update(n);
        self.m5.update(n);
        self.m15.update(n);
    }

    fn m1_rate(&self) -> f64 {
        self.tick_if_necessary();
        self.m1.rate(Duration::from_secs(1))
    }

    fn m5_rate(&self) -> f64 {
        self.tick_if_necessary();
        self.m5.rate(Duration::from_secs(1))
    }

    fn m15_rate(&self) -> f64 {
        self.tick_if_necessary();
        self.m15.rate(Duration::from_secs(1))
    }
}
