use std::sync::Arc;
use std::thread;
use std::time::Duration;

use smet_common::{Clock, ManualClock};
use smet_core::{
    ChunkedAssociativeArray, Ewma, ExponentiallyDecayingReservoir, Reservoir, ReservoirConfig,
    SlidingTimeWindowReservoir, SlidingWindowReservoir, Snapshot, UniformReservoir,
};

fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new())
}

fn decaying(clock: &Arc<ManualClock>, capacity: usize) -> ExponentiallyDecayingReservoir {
    ExponentiallyDecayingReservoir::builder()
        .capacity(capacity)
        .clock(clock.clone())
        .build()
        .expect("decaying reservoir")
}

#[test]
fn test_uniform_reservoir_is_unbiased() {
    const CAPACITY: usize = 10;
    const STREAM: i64 = 100;
    const TRIALS: usize = 10_000;

    let mut hits = vec![0usize; STREAM as usize];
    for _ in 0..TRIALS {
        let reservoir = UniformReservoir::new(CAPACITY).expect("reservoir");
        for value in 0..STREAM {
            reservoir.update(value);
        }
        for value in reservoir.snapshot().values() {
            hits[*value as usize] += 1;
        }
    }

    let expected = CAPACITY as f64 / STREAM as f64;
    for (value, count) in hits.iter().enumerate() {
        let frequency = *count as f64 / TRIALS as f64;
        assert!(
            (frequency - expected).abs() < 0.02,
            "value {value} retained with frequency {frequency}"
        );
    }
}

#[test]
fn test_sliding_window_keeps_most_recent() {
    let reservoir = SlidingWindowReservoir::new(10).expect("reservoir");
    for value in 1..=1_000 {
        reservoir.update(value);
    }
    let expected: Vec<i64> = (991..=1_000).collect();
    assert_eq!(reservoir.snapshot().values(), expected.as_slice());
}

#[test]
fn test_sliding_time_window_boundary() {
    let clock = manual_clock();
    let reservoir = SlidingTimeWindowReservoir::new(Duration::from_secs(10), clock.clone())
        .expect("reservoir");

    // One update per second for 30 seconds, value = tick in seconds.
    for second in 0..=30 {
        reservoir.update(second);
        if second < 30 {
            clock.add_seconds(1);
        }
    }

    let expected: Vec<i64> = (20..=30).collect();
    assert_eq!(reservoir.snapshot().values(), expected.as_slice());

    clock.add_millis(500);
    let expected: Vec<i64> = (21..=30).collect();
    assert_eq!(reservoir.snapshot().values(), expected.as_slice());
}

#[test]
fn test_sliding_time_window_trims_between_reads() {
    let clock = manual_clock();
    let reservoir = SlidingTimeWindowReservoir::new(Duration::from_millis(1), clock.clone())
        .expect("reservoir");
    for value in 0..10_000 {
        reservoir.update(value);
        clock.add_micros(10);
    }
    // 1ms window at 10us spacing holds 101 entries at most.
    assert!(reservoir.size() <= 101);
    assert_eq!(reservoir.snapshot().max(), 9_999);
}

#[test]
fn test_chunked_array_trim_matches_filter() {
    let array = ChunkedAssociativeArray::with_chunk_size(4).expect("array");
    let mut kept: Vec<(i64, i64)> = Vec::new();
    for key in 0..200i64 {
        let value = key * 10;
        array.put(key, value);
        kept.push((key, value));
        if key % 17 == 16 {
            let lo = key - 40;
            array.trim(lo, key);
            kept.retain(|(k, _)| *k >= lo && *k <= key);
        }
    }
    let expected: Vec<i64> = kept.iter().map(|(_, v)| *v).collect();
    assert_eq!(array.values(), expected);
}

#[test]
fn test_decaying_reservoir_converges_to_recent_values() {
    let clock = manual_clock();
    let reservoir = decaying(&clock, 1_028);

    // Two hours of A, then 25 minutes (about 5x the decay horizon) of B.
    for _ in 0..7_200 {
        reservoir.update(1_000);
        clock.add_seconds(1);
    }
    for _ in 0..1_500 {
        reservoir.update(50);
        clock.add_seconds(1);
    }

    let snapshot = reservoir.snapshot();
    assert_eq!(snapshot.median(), 50.0);
    assert_eq!(snapshot.p95(), 50.0);
}

#[test]
fn test_decaying_reservoir_survives_clock_jumps() {
    let clock = manual_clock();
    let reservoir = decaying(&clock, 100);

    for value in 0..1_000 {
        reservoir.update(value);
        clock.add_millis(250);
    }

    clock.add_hours(6);
    reservoir.update(5_000);
    let snapshot = reservoir.snapshot();
    assert!(snapshot.size() >= 1 && snapshot.size() <= 100);
    assert!(snapshot.mean().is_finite());
    assert!(snapshot.std_dev().is_finite());
    assert!(snapshot.value(0.99).expect("quantile").is_finite());

    for _ in 0..1_500 {
        reservoir.update(7);
        clock.add_seconds(1);
    }
    let snapshot = reservoir.snapshot();
    assert_eq!(snapshot.size(), 100);
    assert_eq!(snapshot.median(), 7.0);
}

#[test]
fn test_snapshot_quantile_boundaries() {
    let snapshot = Snapshot::uniform(vec![5, 1, 2, 3, 4]);
    assert_eq!(snapshot.value(0.0).expect("q0"), 1.0);
    assert_eq!(snapshot.value(1.0).expect("q1"), 5.0);
    assert_eq!(snapshot.median(), 3.0);
    assert!(snapshot.value(f64::NAN).is_err());
}

#[test]
fn test_ewma_one_minute_literal() {
    let ewma = Ewma::one_minute();
    ewma.update(3);
    ewma.tick();
    assert!((ewma.rate(Duration::from_secs(1)) - 0.6).abs() < 1e-6);

    for _ in 0..12 {
        ewma.tick();
    }
    assert!((ewma.rate(Duration::from_secs(1)) - 0.221).abs() < 1e-3);
}

#[test]
fn test_reads_are_idempotent() {
    let configs = [
        ReservoirConfig::Uniform { capacity: 50 },
        ReservoirConfig::SlidingWindow { capacity: 50 },
        ReservoirConfig::SlidingTimeWindow { window_secs: 60 },
        ReservoirConfig::default(),
    ];
    for config in configs {
        let clock = manual_clock();
        let reservoir = config.build(clock.clone()).expect("build");
        for value in 0..500 {
            reservoir.update(value * 3 % 101);
            clock.add_millis(10);
        }
        let first = reservoir.snapshot();
        let second = reservoir.snapshot();
        assert_eq!(first.values(), second.values(), "{}", config.kind());
        assert_eq!(first.mean(), second.mean(), "{}", config.kind());
        assert_eq!(reservoir.size(), first.size(), "{}", config.kind());
    }
}

#[test]
fn test_concurrent_updates_respect_capacity() {
    const THREADS: i64 = 4;
    const UPDATES: i64 = 20_000;

    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
    let decaying = ExponentiallyDecayingReservoir::builder()
        .capacity(256)
        .clock(clock.clone())
        .build()
        .expect("decaying");
    let time_window =
        SlidingTimeWindowReservoir::new(Duration::from_secs(60), clock).expect("time window");
    let uniform = UniformReservoir::new(256).expect("uniform");
    let sliding = SlidingWindowReservoir::new(256).expect("sliding");
    let total = (THREADS * UPDATES) as usize;
    let reservoirs: Vec<(&str, Arc<dyn Reservoir>, usize)> = vec![
        ("uniform", Arc::new(uniform) as Arc<dyn Reservoir>, 256),
        ("sliding", Arc::new(sliding) as Arc<dyn Reservoir>, 256),
        ("decaying", Arc::new(decaying) as Arc<dyn Reservoir>, 256),
        ("time window", Arc::new(time_window) as Arc<dyn Reservoir>, total),
    ];

    for (name, reservoir, expected) in reservoirs {
        let handles: Vec<_> = (0..THREADS)
            .map(|thread_id| {
                let reservoir = Arc::clone(&reservoir);
                thread::spawn(move || {
                    for i in 0..UPDATES {
                        reservoir.update(thread_id * UPDATES + i);
                        if i % 5_000 == 0 {
                            let _ = reservoir.snapshot();
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }

        assert_eq!(reservoir.size(), expected, "{name}");
        let snapshot = reservoir.snapshot();
        assert_eq!(snapshot.size(), expected, "{name}");
        assert!(snapshot.min() >= 0 && snapshot.max() < THREADS * UPDATES, "{name}");
    }
}
