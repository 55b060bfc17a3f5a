//! # Sliding Time Window Reservoir
//!
//! Purpose: Retain every observation made within the last `window` of clock
//! time, regardless of how many there are.
//!
//! ## Design Principles
//! 1. **Relative Keys**: Keys are `(tick - epoch) * 256`; the low bits leave
//!    room for 256 observations within one nanosecond.
//! 2. **Keys Stay Inside Their Tick**: A CAS on `last_key` hands out
//!    increasing keys while the clock repeats a tick, but never past the
//!    tick's 256 slots. Further same-tick updates share the last slot; the
//!    chunked array keeps equal keys in arrival order.
//! 3. **Amortized Trim**: Stale entries are dropped every 256 updates and on
//!    every read, so reads never see anything older than the window.
//! 4. **Rebase Instead of Clear**: When keys approach the `i64` range the
//!    epoch moves forward and surviving keys are shifted down; the window is
//!    never lost to an overflow.
//!
//! ```text
//! raw tick:   epoch ......... now - window ========== now
//! key:        0 ............. lo (trim) ============= elapsed * 256
//!                             |<------- kept -------->|
//! ```

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, trace};

use smet_common::{duration_to_nanos, Clock, SmetError, SmetResult};

use crate::chunked::ChunkedAssociativeArray;
use crate::reservoir::Reservoir;
use crate::snapshot::Snapshot;

/// Distinct keys available per clock nanosecond.
const COLLISION_BUFFER: i64 = 256;

/// Updates between amortized trims.
const TRIM_THRESHOLD: u64 = 256;

/// Keys above this trigger a rebase.
const KEY_LIMIT: i64 = i64::MAX / 2;

/// Reservoir holding the observations of the last `window`.
pub struct SlidingTimeWindowReservoir {
    measurements: ChunkedAssociativeArray,
    /// Window length in raw clock nanoseconds.
    window: i64,
    /// Raw tick that key zero corresponds to.
    epoch: RwLock<i64>,
    last_key: AtomicI64,
    count: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl SlidingTimeWindowReservoir {
    /// Creates a reservoir over `window`.
    ///
    /// # Errors
    /// `InvalidWindow` if `window` is zero or too long to key at nanosecond
    /// resolution (about 104 days).
    pub fn new(window: Duration, clock: Arc<dyn Clock>) -> SmetResult<Self> {
        let window = match duration_to_nanos(window) {
            Some(nanos) if nanos > 0 => nanos,
            _ => return Err(SmetError::InvalidWindow),
        };
        match window.checked_mul(COLLISION_BUFFER) {
            Some(span) if span <= KEY_LIMIT / 2 => {}
            _ => return Err(SmetError::InvalidWindow),
        }

        let epoch = clock.tick();
        Ok(SlidingTimeWindowReservoir {
            measurements: ChunkedAssociativeArray::new(),
            window,
            epoch: RwLock::new(epoch),
            last_key: AtomicI64::new(i64::MIN),
            count: AtomicU64::new(0),
            clock,
        })
    }

    /// Returns the window length.
    pub fn window(&self) -> Duration {
        Duration::from_nanos(self.window as u64)
    }

    /// Hands out the next key for `elapsed` raw nanoseconds, or `None` once
    /// keys would pass `KEY_LIMIT`. The key always lies in
    /// `[elapsed * 256, elapsed * 256 + 255]`.
    fn next_key(&self, elapsed: i64) -> Option<i64> {
        let scaled = elapsed.checked_mul(COLLISION_BUFFER)?;
        let ceiling = scaled.checked_add(COLLISION_BUFFER - 1)?;
        loop {
            let old = self.last_key.load(Ordering::Acquire);
            let key = if scaled > old {
                scaled
            } else {
                old.saturating_add(1).min(ceiling)
            };
            if key > KEY_LIMIT {
                return None;
            }
            if key <= old {
                // Slots for this tick are used up, or a later tick already
                // published; nothing to advance.
                return Some(key);
            }
            if self
                .last_key
                .compare_exchange_weak(old, key, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(key);
            }
        }
    }

    /// Moves the epoch to `now - window` and shifts retained keys to match.
    fn rebase(&self, now: i64) {
        let mut epoch = self.epoch.write();

        let elapsed = now.wrapping_sub(*epoch);
        let still_fits = elapsed
            .checked_mul(COLLISION_BUFFER)
            .map_or(false, |scaled| scaled <= KEY_LIMIT)
            && self.last_key.load(Ordering::Acquire) < KEY_LIMIT;
        if still_fits {
            // Rebased by another thread while we waited for the lock.
            return;
        }

        let new_epoch = now.wrapping_sub(self.window);
        let delta = new_epoch.wrapping_sub(*epoch);
        match delta.checked_mul(COLLISION_BUFFER) {
            Some(shift) if shift > 0 => {
                self.measurements.trim(shift, i64::MAX);
                self.measurements.shift_keys(shift);
                let last = self.last_key.load(Ordering::Acquire);
                self.last_key.store(last.saturating_sub(shift), Ordering::Release);
            }
            _ => {
                // The whole window is older than anything retained.
                self.measurements.clear();
                self.last_key.store(i64::MIN, Ordering::Release);
            }
        }

        debug!(
            old_epoch = *epoch,
            new_epoch,
            retained = self.measurements.size(),
            "sliding time window rebased"
        );
        *epoch = new_epoch;
    }

    /// Drops entries older than `now - window`.
    fn trim(&self) {
        let epoch = self.epoch.read();
        let elapsed = self.clock.tick().wrapping_sub(*epoch);
        let lo = elapsed
            .saturating_sub(self.window)
            .saturating_mul(COLLISION_BUFFER);
        self.measurements.trim(lo, i64::MAX);
        trace!(lo, "sliding time window trimmed");
    }
}

impl Reservoir for SlidingTimeWindowReservoir {
    fn update(&self, value: i64) {
        loop {
            let epoch = self.epoch.read();
            let now = self.clock.tick();
            match self.next_key(now.wrapping_sub(*epoch)) {
                Some(key) => {
                    self.measurements.put(key, value);
                    break;
                }
                None => {
                    drop(epoch);
                    self.rebase(now);
                }
            }
        }

        if (self.count.fetch_add(1, Ordering::Relaxed) + 1) % TRIM_THRESHOLD == 0 {
            self.trim();
        }
    }

    fn size(&self) -> usize {
        self.trim();
        self.measurements.size()
    }

    fn snapshot(&self) -> Snapshot {
        self.trim();
        Snapshot::uniform(self.measurements.values())
    }
}
