//! # Snapshots
//!
//! Purpose: Answer quantile and summary-statistic queries over a frozen,
//! sorted copy of a reservoir's contents.
//!
//! ## Design Principles
//!
//! 1. **Immutable After Build**: Sorting happens once in the constructor;
//!    every query afterwards is a read over plain vectors.
//! 2. **Zero, Not NaN**: Empty snapshots and zero total weight report `0`
//!    so reporters never need their own guards.
//! 3. **Caller-Owned**: A snapshot is a fresh value per read; dropping it is
//!    the only cleanup.
//!
//! ## Layout
//!
//! ```text
//! UniformSnapshot   values:       [v0 <= v1 <= ... <= vn-1]
//! WeightedSnapshot  values:       [v0 <= v1 <= ... <= vn-1]
//!                   norm_weights: [w0/W, w1/W, ...]
//!                   quantiles:    [0, w0/W, (w0+w1)/W, ...]   (cumulative)
//! ```

use std::io::Write;

use smet_common::{SmetError, SmetResult};

/// A retained value paired with its decay weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedSample {
    pub value: i64,
    pub weight: f64,
}

impl WeightedSample {
    pub fn new(value: i64, weight: f64) -> Self {
        WeightedSample { value, weight }
    }
}

/// Rejects NaN and anything outside `[0, 1]`.
fn check_quantile(quantile: f64) -> SmetResult<()> {
    if quantile.is_nan() || !(0.0..=1.0).contains(&quantile) {
        return Err(SmetError::InvalidQuantile(quantile));
    }
    Ok(())
}

/// Writes one value per line in ascending order.
fn dump_values<W: Write>(values: &[i64], mut output: W) -> SmetResult<()> {
    for value in values {
        writeln!(output, "{value}")?;
    }
    output.flush()?;
    Ok(())
}

/// Snapshot over equally weighted samples.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UniformSnapshot {
    values: Vec<i64>,
}

impl UniformSnapshot {
    /// Builds a snapshot from an unordered set of values.
    pub fn new(mut values: Vec<i64>) -> Self {
        values.sort_unstable();
        UniformSnapshot { values }
    }

    /// Returns the value at `quantile`, interpolating between order statistics.
    ///
    /// **Input**: `quantile` in `[0, 1]`.
    /// **Output**: interpolated value, or `0` for an empty snapshot.
    ///
    /// **Logic**:
    /// 1. `pos = quantile * (n + 1)`.
    /// 2. Below the first position return the minimum; at or past `n` return
    ///    the maximum.
    /// 3. Otherwise interpolate linearly between `values[pos - 1]` and
    ///    `values[pos]` by the fractional part of `pos`.
    pub fn value(&self, quantile: f64) -> SmetResult<f64> {
        check_quantile(quantile)?;
        Ok(self.quantile(quantile))
    }

    fn quantile(&self, quantile: f64) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }

        let pos = quantile * (self.values.len() + 1) as f64;
        let index = pos as usize;

        if index < 1 {
            return self.values[0] as f64;
        }
        if index >= self.values.len() {
            return self.values[self.values.len() - 1] as f64;
        }

        let lower = self.values[index - 1] as f64;
        let upper = self.values[index] as f64;
        lower + (pos - pos.floor()) * (upper - lower)
    }

    pub fn size(&self) -> usize {
        self.values.len()
    }

    /// Returns the sorted values.
    pub fn values(&self) -> &[i64] {
        &self.values
    }

    pub fn min(&self) -> i64 {
        self.values.first().copied().unwrap_or(0)
    }

    pub fn max(&self) -> i64 {
        self.values.last().copied().unwrap_or(0)
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.values.iter().map(|&v| v as f64).sum();
        sum / self.values.len() as f64
    }

    /// Sample standard deviation (two-pass, divides by `n - 1`).
    pub fn std_dev(&self) -> f64 {
        if self.values.len() <= 1 {
            return 0.0;
        }

        let mean = self.mean();
        let sum: f64 = self
            .values
            .iter()
            .map(|&v| {
                let diff = v as f64 - mean;
                diff * diff
            })
            .sum();

        (sum / (self.values.len() - 1) as f64).sqrt()
    }

    pub fn dump<W: Write>(&self, output: W) -> SmetResult<()> {
        dump_values(&self.values, output)
    }
}

/// Snapshot over decay-weighted samples.
///
/// Heavier samples occupy proportionally more of the quantile range.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WeightedSnapshot {
    values: Vec<i64>,
    norm_weights: Vec<f64>,
    quantiles: Vec<f64>,
}

impl WeightedSnapshot {
    /// Builds a snapshot from an unordered set of weighted samples.
    ///
    /// Weights that are negative or not finite count as zero. If the total
    /// weight is zero every normalized weight is zero, so mean and standard
    /// deviation collapse to `0` instead of NaN.
    pub fn new(samples: impl IntoIterator<Item = WeightedSample>) -> Self {
        let mut samples: Vec<WeightedSample> = samples.into_iter().collect();
        // Stable: ties keep their arrival order.
        samples.sort_by_key(|sample| sample.value);

        let weights: Vec<f64> = samples
            .iter()
            .map(|sample| {
                if sample.weight.is_finite() && sample.weight > 0.0 {
                    sample.weight
                } else {
                    0.0
                }
            })
            .collect();
        // Scaled by the largest weight so the sum stays finite for weights
        // near f64::MAX.
        let largest = weights.iter().copied().fold(0.0, f64::max);
        let scaled: Vec<f64> = weights
            .iter()
            .map(|&w| if largest > 0.0 { w / largest } else { 0.0 })
            .collect();
        let total: f64 = scaled.iter().sum();
        let usable = total.is_finite() && total > 0.0;

        let values: Vec<i64> = samples.iter().map(|sample| sample.value).collect();
        let norm_weights: Vec<f64> = scaled
            .iter()
            .map(|&w| if usable { w / total } else { 0.0 })
            .collect();

        let mut quantiles = vec![0.0; values.len()];
        for i in 1..values.len() {
            quantiles[i] = quantiles[i - 1] + norm_weights[i - 1];
        }

        WeightedSnapshot {
            values,
            norm_weights,
            quantiles,
        }
    }

    /// Returns the value whose cumulative weight range covers `quantile`.
    pub fn value(&self, quantile: f64) -> SmetResult<f64> {
        check_quantile(quantile)?;
        Ok(self.quantile(quantile))
    }

    fn quantile(&self, quantile: f64) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }

        // Number of cumulative starts at or below the quantile; the sample
        // owning the quantile is the last of those.
        let covered = self.quantiles.partition_point(|&start| start <= quantile);
        if covered <= 1 {
            return self.values[0] as f64;
        }
        let index = (covered - 1).min(self.values.len() - 1);
        self.values[index] as f64
    }

    pub fn size(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[i64] {
        &self.values
    }

    pub fn min(&self) -> i64 {
        self.values.first().copied().unwrap_or(0)
    }

    pub fn max(&self) -> i64 {
        self.values.last().copied().unwrap_or(0)
    }

    /// Weighted arithmetic mean.
    pub fn mean(&self) -> f64 {
        self.values
            .iter()
            .zip(&self.norm_weights)
            .map(|(&v, &w)| v as f64 * w)
            .sum()
    }

    /// Weighted standard deviation over normalized weights (two-pass).
    pub fn std_dev(&self) -> f64 {
        if self.values.len() <= 1 {
            return 0.0;
        }

        let mean = self.mean();
        let variance: f64 = self
            .values
            .iter()
            .zip(&self.norm_weights)
            .map(|(&v, &w)| {
                let diff = v as f64 - mean;
                w * diff * diff
            })
            .sum();

        variance.sqrt()
    }

    pub fn dump<W: Write>(&self, output: W) -> SmetResult<()> {
        dump_values(&self.values, output)
    }
}

/// Point-in-time view produced by every reservoir.
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    Uniform(UniformSnapshot),
    Weighted(WeightedSnapshot),
}

impl Snapshot {
    pub fn uniform(values: Vec<i64>) -> Self {
        Snapshot::Uniform(UniformSnapshot::new(values))
    }

    pub fn weighted(samples: impl IntoIterator<Item = WeightedSample>) -> Self {
        Snapshot::Weighted(WeightedSnapshot::new(samples))
    }

    /// Returns the value at `quantile`, or `InvalidQuantile` outside `[0, 1]`.
    pub fn value(&self, quantile: f64) -> SmetResult<f64> {
        match self {
            Snapshot::Uniform(inner) => inner.value(quantile),
            Snapshot::Weighted(inner) => inner.value(quantile),
        }
    }

    fn fixed(&self, quantile: f64) -> f64 {
        match self {
            Snapshot::Uniform(inner) => inner.quantile(quantile),
            Snapshot::Weighted(inner) => inner.quantile(quantile),
        }
    }

    pub fn median(&self) -> f64 {
        self.fixed(0.5)
    }

    pub fn p75(&self) -> f64 {
        self.fixed(0.75)
    }

    pub fn p95(&self) -> f64 {
        self.fixed(0.95)
    }

    pub fn p98(&self) -> f64 {
        self.fixed(0.98)
    }

    pub fn p99(&self) -> f64 {
        self.fixed(0.99)
    }

    pub fn p999(&self) -> f64 {
        self.fixed(0.999)
    }

    pub fn size(&self) -> usize {
        match self {
            Snapshot::Uniform(inner) => inner.size(),
            Snapshot::Weighted(inner) => inner.size(),
        }
    }

    /// Returns the values in ascending order.
    pub fn values(&self) -> &[i64] {
        match self {
            Snapshot::Uniform(inner) => inner.values(),
            Snapshot::Weighted(inner) => inner.values(),
        }
    }

    pub fn min(&self) -> i64 {
        match self {
            Snapshot::Uniform(inner) => inner.min(),
            Snapshot::Weighted(inner) => inner.min(),
        }
    }

    pub fn max(&self) -> i64 {
        match self {
            Snapshot::Uniform(inner) => inner.max(),
            Snapshot::Weighted(inner) => inner.max(),
        }
    }

    pub fn mean(&self) -> f64 {
        match self {
            Snapshot::Uniform(inner) => inner.mean(),
            Snapshot::Weighted(inner) => inner.mean(),
        }
    }

    pub fn std_dev(&self) -> f64 {
        match self {
            Snapshot::Uniform(inner) => inner.std_dev(),
            Snapshot::Weighted(inner) => inner.std_dev(),
        }
    }

    /// Writes each sorted value on its own line.
    pub fn dump<W: Write>(&self, output: W) -> SmetResult<()> {
        dump_values(self.values(), output)
    }
}
