//! Generalized Advantage Estimation (GAE) over variable-length paths.

use crate::baseline::Baseline;
use crate::config::SampleProcessorConfig;
use crate::discount::discount_cumsum;
use anyhow::{bail, Context, Result};
use tau_training_types::{Path, ProcessedPath};

/// Predicts baselines for every path and computes advantages and returns.
///
/// Paths are consumed and returned augmented, in the same order.
#[tracing::instrument(level = "debug", skip(config, baseline, paths), fields(paths = paths.len()))]
pub fn estimate_advantages<B>(
    config: &SampleProcessorConfig,
    baseline: &B,
    paths: Vec<Path>,
) -> Result<Vec<ProcessedPath>>
where
    B: Baseline + ?Sized,
{
    config.validate()?;
    if paths.is_empty() {
        bail!("sample processing requires at least one path");
    }
    for (index, path) in paths.iter().enumerate() {
        path.validate()
            .with_context(|| format!("path {index} failed validation"))?;
    }

    let predictions = baseline.predict_n(&paths)?;
    if predictions.len() != paths.len() {
        bail!(
            "baseline returned {} prediction arrays for {} paths",
            predictions.len(),
            paths.len()
        );
    }

    paths
        .into_iter()
        .zip(predictions)
        .enumerate()
        .map(|(index, (path, baselines))| {
            compute_path_advantages(config, path, baselines)
                .with_context(|| format!("advantage estimation failed for path {index}"))
        })
        .collect()
}

/// Computes GAE advantages and discounted returns for one path.
///
/// The value after the last observed step is taken to be zero.
pub fn compute_path_advantages(
    config: &SampleProcessorConfig,
    path: Path,
    baselines: Vec<f64>,
) -> Result<ProcessedPath> {
    if path.is_empty() {
        bail!("gae inputs must contain at least one step");
    }
    if baselines.len() != path.len() {
        bail!(
            "baseline prediction length mismatch: rewards={}, baselines={}",
            path.len(),
            baselines.len()
        );
    }
    ensure_finite_slice("baselines", &baselines)?;

    let deltas = path
        .rewards
        .iter()
        .enumerate()
        .map(|(index, reward)| {
            let next_value = baselines.get(index + 1).copied().unwrap_or(0.0);
            reward + config.discount * next_value - baselines[index]
        })
        .collect::<Vec<_>>();
    let advantages = discount_cumsum(&deltas, config.discount * config.gae_lambda)?;
    let returns = discount_cumsum(&path.rewards, config.discount)?;
    let env_returns = path
        .env_rewards
        .as_deref()
        .map(|env_rewards| discount_cumsum(env_rewards, config.discount))
        .transpose()?;
    ensure_finite_slice("advantages", &advantages)?;
    ensure_finite_slice("returns", &returns)?;

    Ok(ProcessedPath {
        path,
        baselines,
        advantages,
        returns,
        env_returns,
    })
}

fn ensure_finite_slice(field: &str, values: &[f64]) -> Result<()> {
    if values.iter().any(|value| !value.is_finite()) {
        bail!("non-finite values detected in '{field}'");
    }
    Ok(())
}
