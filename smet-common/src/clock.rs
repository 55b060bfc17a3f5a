//! # Clock Abstraction
//!
//! Purpose: Give every time-aware component an injected source of time so
//! production code reads the monotonic clock while tests drive a manual one.
//!
//! ## Design Principles
//!
//! 1. **Two Readings**: `tick` is an arbitrary-origin nanosecond counter used
//!    only for differences; `time` is epoch milliseconds used only for display.
//! 2. **Injected, Not Global**: Components take `Arc<dyn Clock>` in their
//!    constructors; `default_clock()` is only a convenience.
//! 3. **Wrap-Aware Math**: Callers subtract ticks with `wrapping_sub`, so a
//!    counter crossing `i64::MAX` still yields the correct elapsed time.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Nanoseconds per microsecond.
pub const NANOS_PER_MICRO: i64 = 1_000;
/// Nanoseconds per millisecond.
pub const NANOS_PER_MILLI: i64 = 1_000_000;
/// Nanoseconds per second.
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Source of monotonic ticks and wall-clock time.
pub trait Clock: Send + Sync {
    /// Returns the current tick in nanoseconds from an arbitrary origin.
    fn tick(&self) -> i64;

    /// Returns the current wall-clock time in epoch milliseconds.
    fn time(&self) -> i64;
}

/// Clock backed by `Instant` (ticks) and `SystemTime` (time).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

/// Process-wide anchor so ticks from all `SystemClock` values share an origin.
static ANCHOR: OnceLock<Instant> = OnceLock::new();

impl Clock for SystemClock {
    fn tick(&self) -> i64 {
        let anchor = *ANCHOR.get_or_init(Instant::now);
        // u128 nanos only exceed i64 after ~292 years of uptime.
        anchor.elapsed().as_nanos() as i64
    }

    fn time(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis() as i64
    }
}

/// Returns a shared `SystemClock`.
pub fn default_clock() -> Arc<dyn Clock> {
    static DEFAULT: OnceLock<Arc<dyn Clock>> = OnceLock::new();
    Arc::clone(DEFAULT.get_or_init(|| Arc::new(SystemClock)))
}

/// Deterministic clock advanced explicitly by the caller.
///
/// `time` is derived from the tick, so both readings move together.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicI64,
}

impl ManualClock {
    /// Creates a clock at tick zero.
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Creates a clock at the given tick.
    pub fn starting_at(tick: i64) -> Self {
        ManualClock {
            nanos: AtomicI64::new(tick),
        }
    }

    /// Advances the clock; the counter wraps like a hardware tick source.
    pub fn add_nanos(&self, nanos: i64) {
        // fetch_add on atomics wraps on overflow.
        self.nanos.fetch_add(nanos, Ordering::AcqRel);
    }

    pub fn add_micros(&self, micros: i64) {
        self.add_nanos(micros.wrapping_mul(NANOS_PER_MICRO));
    }

    pub fn add_millis(&self, millis: i64) {
        self.add_nanos(millis.wrapping_mul(NANOS_PER_MILLI));
    }

    pub fn add_seconds(&self, seconds: i64) {
        self.add_nanos(seconds.wrapping_mul(NANOS_PER_SECOND));
    }

    pub fn add_minutes(&self, minutes: i64) {
        self.add_seconds(minutes.wrapping_mul(60));
    }

    pub fn add_hours(&self, hours: i64) {
        self.add_minutes(hours.wrapping_mul(60));
    }

    /// Advances the clock by a `Duration`, saturating at `i64::MAX` nanos.
    pub fn advance(&self, duration: Duration) {
        self.add_nanos(duration_to_nanos(duration).unwrap_or(i64::MAX));
    }
}

impl Clock for ManualClock {
    fn tick(&self) -> i64 {
        self.nanos.load(Ordering::Acquire)
    }

    fn time(&self) -> i64 {
        self.tick() / NANOS_PER_MILLI
    }
}

/// Converts a `Duration` to signed nanoseconds, or `None` if it does not fit.
pub fn duration_to_nanos(duration: Duration) -> Option<i64> {
    i64::try_from(duration.as_nanos()).ok()
}
