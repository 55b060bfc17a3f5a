//! # Exponentially Decaying Reservoir
//!
//! Purpose: Keep a fixed-size, weighted random sample that favors recent
//! observations (forward decay, Cormode et al.), so quantiles track the last
//! few minutes of a long-running stream.
//!
//! ## Design Principles
//! 1. **Forward Decay**: Weight is `exp(alpha * t)` with `t` in seconds since
//!    the landmark; priority is `weight / u` for `u` in `(0, 1]`.
//! 2. **Highest Priorities Win**: A full reservoir admits a sample only if it
//!    beats the current minimum priority, which is then evicted.
//! 3. **Lock-Free Rejection**: The minimum priority is mirrored in an atomic,
//!    so losing samples are discarded without touching the map lock.
//! 4. **Exclusive Rescale**: Moving the landmark rewrites every priority; it
//!    takes the landmark lock exclusively so no insert sees a mixed scale.
//! 5. **Bounded Exponent**: The landmark moves at the configured threshold or
//!    once `alpha * t` nears the point where a priority (`weight * 2^53`) or
//!    the sum of `capacity` weights would overflow, whichever comes first.
//!
//! ## Lock Order
//!
//! ```text
//! landmark (RwLock)  ->  values (Mutex)
//!   update:   read        lock (insert / evict)
//!   rescale:  write       lock (rewrite all)
//!   snapshot: read/write  lock (copy)
//! ```

use std::collections::BTreeMap;
use std::f64::consts::LN_2;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ordered_float::OrderedFloat;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tracing::{debug, warn};

use smet_common::{
    default_clock, duration_to_nanos, Clock, SmetError, SmetResult, NANOS_PER_SECOND,
};

use crate::reservoir::{Reservoir, DEFAULT_CAPACITY};
use crate::snapshot::{Snapshot, WeightedSample};

/// Default decay factor; biases the sample toward roughly the last 5 minutes.
pub const DEFAULT_ALPHA: f64 = 0.015;

/// Default landmark age that triggers a rescale.
pub const DEFAULT_RESCALE_THRESHOLD: Duration = Duration::from_secs(60 * 60);

/// `ln(f64::MAX)`: the largest exponent whose `exp` is finite.
const MAX_EXPONENT: f64 = 709.782_712_893_384;

/// `1 - gen::<f64>()` is at least `2^-53`, so a priority is at most
/// `weight * 2^53`.
const PRIORITY_SPREAD_BITS: f64 = 53.0;

/// Decay age, in raw nanoseconds, past which `exp(alpha * t)` leaves no room
/// for the priority spread or a sum over `capacity` weights.
fn decay_horizon(capacity: usize, alpha: f64) -> i64 {
    let headroom =
        MAX_EXPONENT - (capacity as f64).ln() - PRIORITY_SPREAD_BITS * LN_2 - 1.0;
    let nanos = headroom / alpha * NANOS_PER_SECOND as f64;
    // `as` saturates at i64::MAX for very small alpha.
    (nanos as i64).max(1)
}

/// Fixed-capacity, time-decayed weighted sample.
pub struct ExponentiallyDecayingReservoir {
    values: Mutex<BTreeMap<OrderedFloat<f64>, WeightedSample>>,
    /// Raw tick of the current decay origin.
    landmark: RwLock<i64>,
    /// `f64` bits of the smallest retained priority once full, else zero.
    min_priority: AtomicU64,
    count: AtomicUsize,
    capacity: usize,
    alpha: f64,
    /// Landmark age in raw nanoseconds that forces a rescale: the configured
    /// threshold, capped by the decay horizon.
    rescale_threshold: i64,
    clock: Arc<dyn Clock>,
}

impl ExponentiallyDecayingReservoir {
    /// Creates a reservoir with capacity 1028, alpha 0.015, and a one hour
    /// rescale threshold.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::from_parts(
            DEFAULT_CAPACITY,
            DEFAULT_ALPHA,
            DEFAULT_RESCALE_THRESHOLD.as_secs() as i64 * NANOS_PER_SECOND,
            clock,
        )
    }

    /// Starts a builder for non-default parameters.
    pub fn builder() -> DecayingReservoirBuilder {
        DecayingReservoirBuilder::new()
    }

    fn from_parts(
        capacity: usize,
        alpha: f64,
        rescale_threshold: i64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let landmark = clock.tick();
        let rescale_threshold = rescale_threshold.min(decay_horizon(capacity, alpha));
        ExponentiallyDecayingReservoir {
            values: Mutex::new(BTreeMap::new()),
            landmark: RwLock::new(landmark),
            min_priority: AtomicU64::new(0f64.to_bits()),
            count: AtomicUsize::new(0),
            capacity,
            alpha,
            rescale_threshold,
            clock,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Landmark age that triggers a rescale. Never longer than the configured
    /// threshold; shorter when alpha is high enough that weights would
    /// otherwise overflow first.
    pub fn rescale_interval(&self) -> Duration {
        Duration::from_nanos(self.rescale_threshold as u64)
    }

    /// Records `value` as observed at the raw clock `tick`.
    ///
    /// **Logic**:
    /// 1. Rescale first if the landmark is older than the threshold.
    /// 2. Under the shared landmark lock, weigh the sample by its age and
    ///    draw its priority.
    /// 3. Offer it to the map; a full map evicts its minimum.
    pub fn update_at(&self, value: i64, tick: i64) {
        loop {
            let landmark = self.landmark.read();
            if self.needs_rescale(*landmark) {
                drop(landmark);
                self.rescale();
                continue;
            }

            let elapsed = tick.wrapping_sub(*landmark) as f64 / NANOS_PER_SECOND as f64;
            let weight = (self.alpha * elapsed).exp();
            if !(weight.is_finite() && weight > 0.0) {
                warn!(value, weight, "discarding sample with unusable decay weight");
                return;
            }

            // gen() is in [0, 1); flip it so the divisor is never zero.
            let u = 1.0 - rand::thread_rng().gen::<f64>();
            let priority = weight / u;
            if !priority.is_finite() {
                warn!(value, weight, "discarding sample with unusable priority");
                return;
            }

            self.offer(priority, WeightedSample::new(value, weight));
            return;
        }
    }

    fn offer(&self, priority: f64, sample: WeightedSample) {
        if self.count.load(Ordering::Acquire) >= self.capacity {
            let min = f64::from_bits(self.min_priority.load(Ordering::Acquire));
            if priority <= min {
                return;
            }
        }

        let mut values = self.values.lock();
        let key = OrderedFloat(priority);
        if values.len() < self.capacity {
            if values.contains_key(&key) {
                return;
            }
            values.insert(key, sample);
            self.publish(&values);
            return;
        }

        let beats_min = values
            .first_key_value()
            .map_or(true, |(first, _)| *first < key);
        if beats_min && !values.contains_key(&key) {
            values.insert(key, sample);
            values.pop_first();
            self.publish(&values);
        }
    }

    /// Mirrors map length and minimum priority into the atomics.
    fn publish(&self, values: &BTreeMap<OrderedFloat<f64>, WeightedSample>) {
        self.count.store(values.len(), Ordering::Release);
        let min = if values.len() >= self.capacity {
            values.first_key_value().map_or(0.0, |(first, _)| first.into_inner())
        } else {
            0.0
        };
        self.min_priority.store(min.to_bits(), Ordering::Release);
    }

    #[inline]
    fn needs_rescale(&self, landmark: i64) -> bool {
        self.clock.tick().wrapping_sub(landmark) >= self.rescale_threshold
    }

    fn rescale_if_needed(&self) {
        let needed = self.needs_rescale(*self.landmark.read());
        if needed {
            self.rescale();
        }
    }

    /// Moves the landmark to now and scales every weight and priority by
    /// `exp(-alpha * dt)`. Entries that underflow to zero are dropped.
    fn rescale(&self) {
        let mut landmark = self.landmark.write();
        let now = self.clock.tick();
        let dt = now.wrapping_sub(*landmark);
        if dt < self.rescale_threshold {
            return;
        }

        let factor = (-self.alpha * dt as f64 / NANOS_PER_SECOND as f64).exp();
        let mut values = self.values.lock();
        let before = values.len();
        let old = std::mem::take(&mut *values);
        for (priority, sample) in old {
            let priority = priority.into_inner() * factor;
            let weight = sample.weight * factor;
            let usable = |x: f64| x.is_finite() && x > 0.0;
            if usable(priority) && usable(weight) {
                values
                    .entry(OrderedFloat(priority))
                    .or_insert(WeightedSample::new(sample.value, weight));
            }
        }
        self.publish(&values);

        debug!(
            old_landmark = *landmark,
            new_landmark = now,
            factor,
            retained = values.len(),
            dropped = before - values.len(),
            "decaying reservoir rescaled"
        );
        *landmark = now;
    }
}

impl Reservoir for ExponentiallyDecayingReservoir {
    fn update(&self, value: i64) {
        self.update_at(value, self.clock.tick());
    }

    fn size(&self) -> usize {
        self.count.load(Ordering::Acquire).min(self.capacity)
    }

    fn snapshot(&self) -> Snapshot {
        self.rescale_if_needed();
        let samples: Vec<WeightedSample> = {
            let _landmark = self.landmark.read();
            let values = self.values.lock();
            values.values().copied().collect()
        };
        Snapshot::weighted(samples)
    }
}

/// Builder for `ExponentiallyDecayingReservoir`.
///
/// Starts from capacity 1028, alpha 0.015, a one hour rescale threshold,
/// and the shared system clock.
pub struct DecayingReservoirBuilder {
    capacity: usize,
    alpha: f64,
    rescale_threshold: Duration,
    clock: Option<Arc<dyn Clock>>,
}

impl DecayingReservoirBuilder {
    pub fn new() -> Self {
        DecayingReservoirBuilder {
            capacity: DEFAULT_CAPACITY,
            alpha: DEFAULT_ALPHA,
            rescale_threshold: DEFAULT_RESCALE_THRESHOLD,
            clock: None,
        }
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn rescale_threshold(mut self, threshold: Duration) -> Self {
        self.rescale_threshold = threshold;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validates the parameters and builds the reservoir.
    ///
    /// # Errors
    /// - `InvalidCapacity` for a zero capacity.
    /// - `InvalidAlpha` unless alpha is positive and finite.
    /// - `InvalidRescaleThreshold` if the threshold is zero or overflows
    ///   nanoseconds.
    ///
    /// A threshold too long for `alpha` is not an error; the reservoir
    /// rescales earlier instead.
    pub fn build(self) -> SmetResult<ExponentiallyDecayingReservoir> {
        if self.capacity == 0 {
            return Err(SmetError::InvalidCapacity(self.capacity));
        }
        if !(self.alpha.is_finite() && self.alpha > 0.0) {
            return Err(SmetError::InvalidAlpha(self.alpha));
        }
        let threshold = match duration_to_nanos(self.rescale_threshold) {
            Some(nanos) if nanos > 0 => nanos,
            _ => return Err(SmetError::InvalidRescaleThreshold),
        };
        let clock = self.clock.unwrap_or_else(default_clock);
        Ok(ExponentiallyDecayingReservoir::from_parts(
            self.capacity,
            self.alpha,
            threshold,
            clock,
        ))
    }
}

impl Default for DecayingReservoirBuilder {
    fn default() -> Self {
        Self::new()
    }
}
