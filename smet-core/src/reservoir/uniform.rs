//! Algorithm R: an unbiased fixed-size random sample of the whole stream.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use rand::Rng;

use smet_common::{SmetError, SmetResult};

use crate::reservoir::{Reservoir, DEFAULT_CAPACITY};
use crate::snapshot::Snapshot;

/// Lock-free uniform reservoir.
///
/// After `n` updates each observation is retained with probability `k / n`.
#[derive(Debug)]
pub struct UniformReservoir {
    values: Box<[AtomicI64]>,
    /// Set once a slot has received its first value.
    written: Box<[AtomicBool]>,
    count: AtomicU64,
}

impl UniformReservoir {
    /// # Errors
    /// `InvalidCapacity` for a zero capacity.
    pub fn new(capacity: usize) -> SmetResult<Self> {
        if capacity == 0 {
            return Err(SmetError::InvalidCapacity(capacity));
        }
        Ok(Self::with_slots(capacity))
    }

    pub fn with_default_capacity() -> Self {
        Self::with_slots(DEFAULT_CAPACITY)
    }

    fn with_slots(capacity: usize) -> Self {
        UniformReservoir {
            values: (0..capacity).map(|_| AtomicI64::new(0)).collect(),
            written: (0..capacity).map(|_| AtomicBool::new(false)).collect(),
            count: AtomicU64::new(0),
        }
    }

    #[inline]
    fn capacity(&self) -> u64 {
        self.values.len() as u64
    }
}

impl Reservoir for UniformReservoir {
    fn update(&self, value: i64) {
        let n = self.count.fetch_add(1, Ordering::AcqRel) + 1;
        if n <= self.capacity() {
            let slot = (n - 1) as usize;
            self.values[slot].store(value, Ordering::Relaxed);
            self.written[slot].store(true, Ordering::Release);
            return;
        }

        let r = rand::thread_rng().gen_range(0..n);
        if r < self.capacity() {
            self.values[r as usize].store(value, Ordering::Relaxed);
        }
    }

    fn size(&self) -> usize {
        self.count.load(Ordering::Acquire).min(self.capacity()) as usize
    }

    fn snapshot(&self) -> Snapshot {
        let live = self.size();
        let values: Vec<i64> = (0..live)
            .filter(|&slot| self.written[slot].load(Ordering::Acquire))
            .map(|slot| self.values[slot].load(Ordering::Relaxed))
            .collect();
        Snapshot::uniform(values)
    }
}
