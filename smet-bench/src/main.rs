//! # Reservoir Benchmark Harness
//!
//! Purpose: Hammer every reservoir and rate estimator from several producer
//! threads while a reader takes snapshots, then report throughput and the
//! resulting distribution.
//!
//! ## Design Principles
//! 1. **Deterministic Workload**: Each producer draws values from a seeded
//!    `SmallRng`, so runs are comparable over time.
//! 2. **Config Driven**: An optional JSON `ReservoirConfig` selects a single
//!    reservoir; otherwise every kind is measured.
//! 3. **Dynamic Dispatch on Purpose**: Reservoirs are driven through
//!    `Arc<dyn Reservoir>`, the way metric types hold them.
//!
//! Usage: `bench_reservoirs [threads] [ops_per_thread] [config_json]`

use std::env;
use std::hint::black_box;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use smet_common::default_clock;
use smet_core::{MovingAverages, RateConfig, Reservoir, ReservoirConfig, Snapshot};

const DEFAULT_THREADS: usize = 4;
const DEFAULT_OPS_PER_THREAD: usize = 1_000_000;

struct BenchConfig {
    threads: usize,
    ops_per_thread: usize,
    reservoirs: Vec<ReservoirConfig>,
}

impl BenchConfig {
    fn from_args() -> Result<Self> {
        let mut args = env::args().skip(1);
        let threads = parse_usize(args.next(), DEFAULT_THREADS).max(1);
        let ops_per_thread = parse_usize(args.next(), DEFAULT_OPS_PER_THREAD);

        let reservoirs = match args.next() {
            Some(raw) => {
                let config: ReservoirConfig = serde_json::from_str(&raw)
                    .with_context(|| format!("invalid reservoir config: {raw}"))?;
                vec![config]
            }
            None => vec![
                ReservoirConfig::Uniform { capacity: 1028 },
                ReservoirConfig::SlidingWindow { capacity: 1028 },
                ReservoirConfig::SlidingTimeWindow { window_secs: 60 },
                ReservoirConfig::default(),
            ],
        };

        Ok(BenchConfig {
            threads,
            ops_per_thread,
            reservoirs,
        })
    }

    fn total_ops(&self) -> usize {
        self.threads * self.ops_per_thread
    }
}

fn parse_usize(value: Option<String>, fallback: usize) -> usize {
    value.and_then(|raw| raw.parse().ok()).unwrap_or(fallback)
}

/// Latency-shaped value in nanoseconds: mostly small, with a long tail.
#[inline]
fn next_latency(rng: &mut SmallRng) -> i64 {
    let base = rng.gen_range(0..0x1_0000i64);
    if rng.gen_ratio(1, 16) {
        base * 100
    } else {
        base
    }
}

fn report(label: &str, ops: usize, elapsed: Duration) {
    let secs = elapsed.as_secs_f64();
    let ops_per_sec = (ops as f64) / secs;
    let nanos_per_op = (secs * 1e9) / (ops as f64);
    info!(
        "{label}: {ops} ops in {secs:.3}s ({ops_per_sec:.0} ops/s, {nanos_per_op:.1} ns/op)"
    );
}

fn report_snapshot(label: &str, snapshot: &Snapshot) {
    info!(
        size = snapshot.size(),
        min = snapshot.min(),
        max = snapshot.max(),
        mean = snapshot.mean(),
        std_dev = snapshot.std_dev(),
        p50 = snapshot.median(),
        p99 = snapshot.p99(),
        p999 = snapshot.p999(),
        "{label} snapshot"
    );
}

/// Runs producers against `reservoir` while one reader snapshots it.
fn drive_reservoir(
    reservoir: Arc<dyn Reservoir>,
    config: &BenchConfig,
) -> Result<(Duration, usize)> {
    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let reservoir = Arc::clone(&reservoir);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut reads = 0usize;
            while !done.load(Ordering::Acquire) {
                black_box(reservoir.snapshot());
                reads += 1;
                thread::sleep(Duration::from_millis(1));
            }
            reads
        })
    };

    let start = Instant::now();
    let producers: Vec<_> = (0..config.threads)
        .map(|id| {
            let reservoir = Arc::clone(&reservoir);
            let ops = config.ops_per_thread;
            thread::spawn(move || {
                let mut rng = SmallRng::seed_from_u64(0x1234_5678_9ABC_DEF0 ^ id as u64);
                for _ in 0..ops {
                    reservoir.update(next_latency(&mut rng));
                }
            })
        })
        .collect();

    for producer in producers {
        producer
            .join()
            .map_err(|_| anyhow::anyhow!("producer thread panicked"))?;
    }
    let elapsed = start.elapsed();

    done.store(true, Ordering::Release);
    let reads = reader
        .join()
        .map_err(|_| anyhow::anyhow!("reader thread panicked"))?;
    Ok((elapsed, reads))
}

fn bench_rates(config: &BenchConfig) -> Result<()> {
    for rate_config in [RateConfig::Exponential, RateConfig::SlidingTimeWindow] {
        let rates: Arc<dyn MovingAverages> = Arc::from(rate_config.build(default_clock()));
        let start = Instant::now();
        let producers: Vec<_> = (0..config.threads)
            .map(|_| {
                let rates = Arc::clone(&rates);
                let ops = config.ops_per_thread;
                thread::spawn(move || {
                    for _ in 0..ops {
                        rates.update(1);
                    }
                })
            })
            .collect();
        for producer in producers {
            producer
                .join()
                .map_err(|_| anyhow::anyhow!("rate thread panicked"))?;
        }
        let label = format!("{rate_config:?} rates");
        report(&label, config.total_ops(), start.elapsed());
        info!(
            m1 = rates.m1_rate(),
            m5 = rates.m5_rate(),
            m15 = rates.m15_rate(),
            "{label} (events/s)"
        );
    }
    Ok(())
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(err) = run() {
        eprintln!("bench_reservoirs failed: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let config = BenchConfig::from_args()?;
    info!(
        threads = config.threads,
        ops_per_thread = config.ops_per_thread,
        reservoirs = config.reservoirs.len(),
        "starting benchmark"
    );
    if config.ops_per_thread == 0 {
        warn!("ops_per_thread is zero; nothing to measure");
        return Ok(());
    }

    for reservoir_config in &config.reservoirs {
        let label = reservoir_config.kind();
        let reservoir: Arc<dyn Reservoir> = Arc::from(
            reservoir_config
                .build(default_clock())
                .with_context(|| format!("building {label} reservoir"))?,
        );

        let (elapsed, reads) = drive_reservoir(Arc::clone(&reservoir), &config)?;
        report(label, config.total_ops(), elapsed);
        info!(reads, "{label} concurrent snapshots");

        let start = Instant::now();
        let snapshot = reservoir.snapshot();
        info!(
            micros = start.elapsed().as_micros() as u64,
            "{label} final snapshot"
        );
        report_snapshot(label, &snapshot);
    }

    bench_rates(&config)
}
