//! # Construction Config
//!
//! Purpose: Describe reservoirs and rate estimators as data (JSON, TOML, ...)
//! and build validated trait objects from them.
//!
//! ```json
//! { "kind": "exponentially_decaying", "capacity": 512, "alpha": 0.015 }
//! { "kind": "sliding_time_window", "window_secs": 30 }
//! { "kind": "exponential" }
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use smet_common::{Clock, SmetResult};

use crate::moving_averages::{ExponentialMovingAverages, MovingAverages};
use crate::reservoir::{
    DecayingReservoirBuilder, Reservoir, SlidingTimeWindowReservoir, SlidingWindowReservoir,
    UniformReservoir, DEFAULT_ALPHA, DEFAULT_CAPACITY, DEFAULT_RESCALE_THRESHOLD,
};
use crate::window_averages::SlidingTimeWindowMovingAverages;

/// Reservoir selection, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReservoirConfig {
    /// Algorithm R over the whole stream.
    Uniform {
        #[serde(default = "default_capacity")]
        capacity: usize,
    },
    /// The last `capacity` observations.
    SlidingWindow {
        #[serde(default = "default_capacity")]
        capacity: usize,
    },
    /// Everything from the last `window_secs` seconds.
    SlidingTimeWindow {
        #[serde(default = "default_window_secs")]
        window_secs: u64,
    },
    /// Forward-decay priority sample.
    ExponentiallyDecaying {
        #[serde(default = "default_capacity")]
        capacity: usize,
        #[serde(default = "default_alpha")]
        alpha: f64,
        #[serde(default = "default_rescale_threshold_secs")]
        rescale_threshold_secs: u64,
    },
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_window_secs() -> u64 {
    60
}

fn default_alpha() -> f64 {
    DEFAULT_ALPHA
}

fn default_rescale_threshold_secs() -> u64 {
    DEFAULT_RESCALE_THRESHOLD.as_secs()
}

impl Default for ReservoirConfig {
    fn default() -> Self {
        ReservoirConfig::ExponentiallyDecaying {
            capacity: default_capacity(),
            alpha: default_alpha(),
            rescale_threshold_secs: default_rescale_threshold_secs(),
        }
    }
}

impl ReservoirConfig {
    /// Builds the configured reservoir, validating every parameter.
    pub fn build(&self, clock: Arc<dyn Clock>) -> SmetResult<Box<dyn Reservoir>> {
        let reservoir: Box<dyn Reservoir> = match *self {
            ReservoirConfig::Uniform { capacity } => Box::new(UniformReservoir::new(capacity)?),
            ReservoirConfig::SlidingWindow { capacity } => {
                Box::new(SlidingWindowReservoir::new(capacity)?)
            }
            ReservoirConfig::SlidingTimeWindow { window_secs } => Box::new(
                SlidingTimeWindowReservoir::new(Duration::from_secs(window_secs), clock)?,
            ),
            ReservoirConfig::ExponentiallyDecaying {
                capacity,
                alpha,
                rescale_threshold_secs,
            } => Box::new(
                DecayingReservoirBuilder::new()
                    .capacity(capacity)
                    .alpha(alpha)
                    .rescale_threshold(Duration::from_secs(rescale_threshold_secs))
                    .clock(clock)
                    .build()?,
            ),
        };
        Ok(reservoir)
    }

    /// Short name used in logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            ReservoirConfig::Uniform { .. } => "uniform",
            ReservoirConfig::SlidingWindow { .. } => "sliding_window",
            ReservoirConfig::SlidingTimeWindow { .. } => "sliding_time_window",
            ReservoirConfig::ExponentiallyDecaying { .. } => "exponentially_decaying",
        }
    }
}

/// Rate estimator selection, tagged by `kind`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RateConfig {
    /// 1/5/15-minute EWMAs.
    #[default]
    Exponential,
    /// Exact counts over one-second buckets.
    SlidingTimeWindow,
}

impl RateConfig {
    pub fn build(&self, clock: Arc<dyn Clock>) -> Box<dyn MovingAverages> {
        match self {
            RateConfig::Exponential => Box::new(ExponentialMovingAverages::new(clock)),
            RateConfig::SlidingTimeWindow => Box::new(SlidingTimeWindowMovingAverages::new(clock)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smet_common::{ManualClock, SmetError};

    fn clock() -> Arc<dyn Clock> {
        Arc::new(ManualClock::new())
    }

    #[test]
    fn test_parse_with_defaults() {
        let config: ReservoirConfig =
            serde_json::from_str(r#"{"kind": "exponentially_decaying"}"#).unwrap();
        assert_eq!(config, ReservoirConfig::default());

        let config: ReservoirConfig =
            serde_json::from_str(r#"{"kind": "sliding_time_window"}"#).unwrap();
        assert_eq!(config, ReservoirConfig::SlidingTimeWindow { window_secs: 60 });
    }

    #[test]
    fn test_parse_explicit_fields() {
        let config: ReservoirConfig =
            serde_json::from_str(r#"{"kind": "uniform", "capacity": 16}"#).unwrap();
        assert_eq!(config, ReservoirConfig::Uniform { capacity: 16 });
        assert_eq!(config.kind(), "uniform");
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let parsed = serde_json::from_str::<ReservoirConfig>(r#"{"kind": "hdr"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_round_trip_json() {
        let config = ReservoirConfig::SlidingWindow { capacity: 3 };
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(json, r#"{"kind":"sliding_window","capacity":3}"#);
    }

    #[test]
    fn test_build_every_kind() {
        let configs = [
            ReservoirConfig::Uniform { capacity: 4 },
            ReservoirConfig::SlidingWindow { capacity: 4 },
            ReservoirConfig::SlidingTimeWindow { window_secs: 10 },
            ReservoirConfig::default(),
        ];
        for config in configs {
            let reservoir = config.build(clock()).unwrap();
            reservoir.update(7);
            assert_eq!(reservoir.size(), 1, "{}", config.kind());
            assert_eq!(reservoir.snapshot().values(), &[7]);
        }
    }

    #[test]
    fn test_build_validates() {
        let err = ReservoirConfig::Uniform { capacity: 0 }.build(clock()).err().unwrap();
        assert!(matches!(err, SmetError::InvalidCapacity(0)));

        let err = ReservoirConfig::SlidingTimeWindow { window_secs: 0 }
            .build(clock())
            .err()
            .unwrap();
        assert!(matches!(err, SmetError::InvalidWindow));
    }

    #[test]
    fn test_rate_config() {
        let config: RateConfig =
            serde_json::from_str(r#"{"kind": "sliding_time_window"}"#).unwrap();
        assert_eq!(config, RateConfig::SlidingTimeWindow);
        assert_eq!(RateConfig::default(), RateConfig::Exponential);

        let rates = config.build(clock());
        rates.update(60);
        assert!((rates.m1_rate() - 1.0).abs() < 1e-12);
    }
}
