//! Most-recent-`k` circular buffer.

use parking_lot::Mutex;

use smet_common::{SmetError, SmetResult};

use crate::reservoir::Reservoir;
use crate::snapshot::Snapshot;

#[derive(Debug)]
struct Ring {
    values: Vec<i64>,
    count: u64,
}

/// Keeps exactly the last `capacity` observations.
#[derive(Debug)]
pub struct SlidingWindowReservoir {
    ring: Mutex<Ring>,
}

impl SlidingWindowReservoir {
    /// # Errors
    /// `InvalidCapacity` for a zero capacity.
    pub fn new(capacity: usize) -> SmetResult<Self> {
        if capacity == 0 {
            return Err(SmetError::InvalidCapacity(capacity));
        }
        Ok(SlidingWindowReservoir {
            ring: Mutex::new(Ring {
                values: vec![0; capacity],
                count: 0,
            }),
        })
    }
}

impl Reservoir for SlidingWindowReservoir {
    fn update(&self, value: i64) {
        let mut ring = self.ring.lock();
        let slot = (ring.count % ring.values.len() as u64) as usize;
        ring.values[slot] = value;
        ring.count += 1;
    }

    fn size(&self) -> usize {
        let ring = self.ring.lock();
        ring.count.min(ring.values.len() as u64) as usize
    }

    fn snapshot(&self) -> Snapshot {
        let values = {
            let ring = self.ring.lock();
            let live = ring.count.min(ring.values.len() as u64) as usize;
            ring.values[..live].to_vec()
        };
        Snapshot::uniform(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_window() {
        let reservoir = SlidingWindowReservoir::new(3).unwrap();
        reservoir.update(1);
        reservoir.update(2);
        assert_eq!(reservoir.size(), 2);
        assert_eq!(reservoir.snapshot().values(), &[1, 2]);
    }

    #[test]
    fn test_keeps_most_recent() {
        let reservoir = SlidingWindowReservoir::new(3).unwrap();
        for value in 1..=5 {
            reservoir.update(value);
        }
        assert_eq!(reservoir.size(), 3);
        assert_eq!(reservoir.snapshot().values(), &[3, 4, 5]);
    }

    #[test]
    fn test_zero_capacity() {
        assert!(matches!(
            SlidingWindowReservoir::new(0),
            Err(SmetError::InvalidCapacity(0))
        ));
    }
}
