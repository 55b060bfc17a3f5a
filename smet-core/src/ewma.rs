//! # Exponentially Weighted Moving Average
//!
//! Purpose: Estimate a decaying event rate from counts recorded between
//! fixed-interval ticks.
//!
//! ## Design Principles
//! 1. **Counting Is Lock-Free**: `update` is a single `fetch_add`; only `tick`
//!    touches the rate.
//! 2. **Nanosecond Rate**: The stored rate is events per nanosecond; `rate`
//!    rescales it to whatever unit the caller asks for.
//! 3. **O(1) Catch-Up**: `tick_n` folds any number of idle ticks into one
//!    power, so long gaps never loop.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use smet_common::{duration_to_nanos, SmetError, SmetResult};

/// Tick interval used by the standard presets.
pub const TICK_INTERVAL: Duration = Duration::from_secs(5);

const ONE_MINUTE: Duration = Duration::from_secs(60);
const FIVE_MINUTES: Duration = Duration::from_secs(5 * 60);
const FIFTEEN_MINUTES: Duration = Duration::from_secs(15 * 60);

/// Single decaying rate over one window.
#[derive(Debug)]
pub struct Ewma {
    alpha: f64,
    interval_nanos: f64,
    uncounted: AtomicI64,
    /// `f64` bits of events per nanosecond.
    rate: AtomicU64,
    initialized: AtomicBool,
}

impl Ewma {
    /// Creates an EWMA with an explicit smoothing factor.
    ///
    /// # Errors
    /// `InvalidAlpha` unless `0 < alpha <= 1`; `InvalidInterval` for a zero
    /// or oversized interval.
    pub fn new(alpha: f64, interval: Duration) -> SmetResult<Self> {
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(SmetError::InvalidAlpha(alpha));
        }
        let interval_nanos = match duration_to_nanos(interval) {
            Some(nanos) if nanos > 0 => nanos,
            _ => return Err(SmetError::InvalidInterval),
        };

        Ok(Ewma {
            alpha,
            interval_nanos: interval_nanos as f64,
            uncounted: AtomicI64::new(0),
            rate: AtomicU64::new(0f64.to_bits()),
            initialized: AtomicBool::new(false),
        })
    }

    /// Creates an EWMA whose smoothing factor is `1 - exp(-interval / window)`.
    pub fn with_window(window: Duration, interval: Duration) -> SmetResult<Self> {
        if window.is_zero() {
            return Err(SmetError::InvalidWindow);
        }
        let alpha = 1.0 - (-interval.as_secs_f64() / window.as_secs_f64()).exp();
        Self::new(alpha, interval)
    }

    pub fn one_minute() -> Self {
        Self::preset(ONE_MINUTE)
    }

    pub fn five_minute() -> Self {
        Self::preset(FIVE_MINUTES)
    }

    pub fn fifteen_minute() -> Self {
        Self::preset(FIFTEEN_MINUTES)
    }

    fn preset(window: Duration) -> Self {
        let alpha = 1.0 - (-TICK_INTERVAL.as_secs_f64() / window.as_secs_f64()).exp();
        Ewma {
            alpha,
            interval_nanos: TICK_INTERVAL.as_nanos() as f64,
            uncounted: AtomicI64::new(0),
            rate: AtomicU64::new(0f64.to_bits()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Records `n` events; the rate changes on the next tick.
    #[inline]
    pub fn update(&self, n: i64) {
        self.uncounted.fetch_add(n, Ordering::Relaxed);
    }

    /// Folds the events counted since the last tick into the rate.
    ///
    /// Ticks must not run concurrently with each other; callers elect one
    /// ticking thread (see `ExponentialMovingAverages`).
    pub fn tick(&self) {
        let count = self.uncounted.swap(0, Ordering::AcqRel);
        let instant = count as f64 / self.interval_nanos;
        if self.initialized.load(Ordering::Acquire) {
            let rate = self.load_rate();
            self.store_rate(rate + self.alpha * (instant - rate));
        } else {
            self.store_rate(instant);
            self.initialized.store(true, Ordering::Release);
        }
    }

    /// Applies `n` ticks: one regular tick, then `n - 1` ticks with no events.
    pub fn tick_n(&self, n: u64) {
        if n == 0 {
            return;
        }
        self.tick();
        if n > 1 {
            let decay = (1.0 - self.alpha).powf((n - 1) as f64);
            self.store_rate(self.load_rate() * decay);
        }
    }

    /// Returns the rate in events per `per`, or zero before the first tick.
    pub fn rate(&self, per: Duration) -> f64 {
        if !self.initialized.load(Ordering::Acquire) {
            return 0.0;
        }
        self.load_rate() * per.as_nanos() as f64
    }

    /// Returns the smoothing factor.
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    #[inline]
    fn load_rate(&self) -> f64 {
        f64::from_bits(self.rate.load(Ordering::Acquire))
    }

    #[inline]
    fn store_rate(&self, rate: f64) {
        self.rate.store(rate.to_bits(), Ordering::Release);
    }
}
