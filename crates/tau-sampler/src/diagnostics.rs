//! Per-iteration sample diagnostics and the sinks they are recorded to.

use crate::assembler::BatchSummary;
use crate::stats;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tau_training_types::ProcessedPath;

/// Value recorded under one diagnostics key.
#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticValue {
    Scalar(f64),
    Count(u64),
    Series(Vec<f64>),
}

/// Key-value recording sink, flushed once per iteration.
pub trait DiagnosticsSink {
    fn record(&mut self, key: &str, value: DiagnosticValue);
    fn flush(&mut self) -> Result<()>;
}

/// Values flushed together at the end of one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticsSnapshot {
    pub flushed_at: DateTime<Utc>,
    pub values: BTreeMap<String, DiagnosticValue>,
}

/// In-memory tabular recorder keeping every flushed snapshot.
#[derive(Debug, Default, Clone)]
pub struct TabularRecorder {
    pending: BTreeMap<String, DiagnosticValue>,
    history: Vec<DiagnosticsSnapshot>,
}

impl TabularRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Values recorded since the last flush.
    pub fn pending(&self) -> &BTreeMap<String, DiagnosticValue> {
        &self.pending
    }

    pub fn history(&self) -> &[DiagnosticsSnapshot] {
        &self.history
    }

    /// Most recent flushed snapshot.
    pub fn latest(&self) -> Option<&DiagnosticsSnapshot> {
        self.history.last()
    }
}

impl DiagnosticsSink for TabularRecorder {
    fn record(&mut self, key: &str, value: DiagnosticValue) {
        self.pending.insert(key.to_string(), value);
    }

    fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.history.push(DiagnosticsSnapshot {
            flushed_at: Utc::now(),
            values: std::mem::take(&mut self.pending),
        });
        Ok(())
    }
}

/// Sink that emits each flushed table as one structured `tracing` event.
#[derive(Debug, Default, Clone)]
pub struct TracingSink {
    pending: BTreeMap<String, DiagnosticValue>,
}

impl DiagnosticsSink for TracingSink {
    fn record(&mut self, key: &str, value: DiagnosticValue) {
        self.pending.insert(key.to_string(), value);
    }

    fn flush(&mut self) -> Result<()> {
        let table = std::mem::take(&mut self.pending);
        for (key, value) in &table {
            match value {
                DiagnosticValue::Scalar(value) => tracing::info!(key = %key, value, "tabular"),
                DiagnosticValue::Count(value) => tracing::info!(key = %key, value, "tabular"),
                DiagnosticValue::Series(values) => {
                    tracing::debug!(key = %key, len = values.len(), "tabular series")
                }
            }
        }
        Ok(())
    }
}

/// Fraction of return variance explained by baseline predictions.
///
/// Returns NaN when the returns have (near) zero variance.
pub fn explained_variance(predictions: &[f64], targets: &[f64]) -> f64 {
    if predictions.len() != targets.len() || targets.is_empty() {
        return f64::NAN;
    }
    let target_variance = stats::variance(targets);
    if target_variance.abs() <= 1e-8 {
        return f64::NAN;
    }
    let residuals = targets
        .iter()
        .zip(predictions)
        .map(|(target, prediction)| target - prediction)
        .collect::<Vec<_>>();
    1.0 - stats::variance(&residuals) / (target_variance + 1e-8)
}

/// Return statistics for one reward channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnStats {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl ReturnStats {
    fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        Some(Self {
            mean: stats::mean(values),
            std: stats::std_dev(values),
            min: stats::min(values),
            max: stats::max(values),
        })
    }
}

/// Summary of one processed iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleDiagnostics {
    pub iteration: u64,
    pub num_trajs: usize,
    pub average_discounted_return: f64,
    pub average_discounted_env_return: Option<f64>,
    pub returns: ReturnStats,
    pub env_returns: Option<ReturnStats>,
    pub explained_variance: f64,
    pub entropy: f64,
    pub perplexity: f64,
    pub concat_returns: Vec<f64>,
    pub concat_baselines: Vec<f64>,
}

impl SampleDiagnostics {
    /// Computes diagnostics from processed paths and the batch summary.
    pub fn compute(iteration: u64, paths: &[ProcessedPath], summary: &BatchSummary) -> Self {
        let concat_returns = paths
            .iter()
            .flat_map(|path| path.returns.iter().copied())
            .collect::<Vec<_>>();
        let concat_baselines = paths
            .iter()
            .flat_map(|path| path.baselines.iter().copied())
            .collect::<Vec<_>>();
        let returns = ReturnStats::from_values(&summary.undiscounted_returns).unwrap_or(
            ReturnStats {
                mean: f64::NAN,
                std: f64::NAN,
                min: f64::NAN,
                max: f64::NAN,
            },
        );

        Self {
            iteration,
            num_trajs: paths.len(),
            average_discounted_return: summary.average_discounted_return,
            average_discounted_env_return: summary.average_discounted_env_return,
            returns,
            env_returns: ReturnStats::from_values(&summary.undiscounted_env_returns),
            explained_variance: explained_variance(&concat_baselines, &concat_returns),
            entropy: summary.entropy,
            perplexity: summary.entropy.exp(),
            concat_returns,
            concat_baselines,
        }
    }

    /// Records every defined statistic; undefined ones are skipped.
    pub fn emit(&self, sink: &mut dyn DiagnosticsSink) {
        sink.record("Iteration", DiagnosticValue::Count(self.iteration));
        record_defined(
            sink,
            "AverageDiscountedReturn",
            Some(self.average_discounted_return),
        );
        record_defined(
            sink,
            "AverageDiscountedEnvReturn",
            self.average_discounted_env_return,
        );
        record_defined(sink, "AverageReturn", Some(self.returns.mean));
        record_defined(
            sink,
            "AverageEnvReturn",
            self.env_returns.as_ref().map(|stats| stats.mean),
        );
        record_defined(sink, "ExplainedVariance", Some(self.explained_variance));
        sink.record("NumTrajs", DiagnosticValue::Count(self.num_trajs as u64));
        record_defined(sink, "Entropy", Some(self.entropy));
        record_defined(sink, "Perplexity", Some(self.perplexity));
        record_defined(sink, "StdReturn", Some(self.returns.std));
        record_defined(sink, "MaxReturn", Some(self.returns.max));
        record_defined(sink, "MinReturn", Some(self.returns.min));
        sink.record(
            "ConcatReturns",
            DiagnosticValue::Series(self.concat_returns.clone()),
        );
        sink.record(
            "ConcatBaselines",
            DiagnosticValue::Series(self.concat_baselines.clone()),
        );
        if let Some(env_returns) = &self.env_returns {
            record_defined(sink, "StdEnvReturn", Some(env_returns.std));
            record_defined(sink, "MaxEnvReturn", Some(env_returns.max));
            record_defined(sink, "MinEnvReturn", Some(env_returns.min));
        }
    }
}

fn record_defined(sink: &mut dyn DiagnosticsSink, key: &str, value: Option<f64>) {
    match value {
        Some(value) if !value.is_nan() => sink.record(key, DiagnosticValue::Scalar(value)),
        _ => tracing::debug!(key, "skipping undefined diagnostic"),
    }
}
