//! Batch assembly in flat (feed-forward) or padded time-major (recurrent) layout.

use crate::config::SampleProcessorConfig;
use crate::policy::{EntropySource, Policy};
use crate::stats;
use crate::tensor_ops::{
    concat_info_maps, concat_series, concat_values, max_path_length, pad_info_maps,
    pad_series_n, pad_values_n, valid_mask,
};
use anyhow::{bail, Context, Result};
use tau_training_types::{
    FlatBatch, InfoMap, PaddedBatch, PaddedTensor, ProcessedPath, SampleBatch,
};

/// Aggregates computed alongside the batch for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    /// Mean over paths of the discounted return from the first state.
    pub average_discounted_return: f64,
    /// Same as above over paths that carry env rewards; `None` when none do.
    pub average_discounted_env_return: Option<f64>,
    pub undiscounted_returns: Vec<f64>,
    pub undiscounted_env_returns: Vec<f64>,
    /// Mean policy entropy over real timesteps.
    pub entropy: f64,
}

/// Assembled training batch plus its summary statistics.
#[derive(Debug, Clone)]
pub struct AssembledBatch {
    pub batch: SampleBatch,
    pub summary: BatchSummary,
}

/// Builds the training batch, choosing the layout from the policy.
#[tracing::instrument(level = "debug", skip_all, fields(paths = paths.len()))]
pub fn assemble_batch<P>(
    config: &SampleProcessorConfig,
    policy: &P,
    paths: Vec<ProcessedPath>,
) -> Result<AssembledBatch>
where
    P: Policy + ?Sized,
{
    if paths.is_empty() {
        bail!("batch assembly requires at least one path");
    }

    let recurrent = policy.is_recurrent();
    tracing::debug!(recurrent, "assembling sample batch");
    let partial = summarize_paths(&paths);
    let (batch, entropy) = if recurrent {
        assemble_padded(config, policy.distribution(), paths)?
    } else {
        assemble_flat(config, policy.distribution(), paths)?
    };

    Ok(AssembledBatch {
        batch,
        summary: BatchSummary { entropy, ..partial },
    })
}

fn assemble_flat(
    config: &SampleProcessorConfig,
    distribution: &dyn EntropySource,
    paths: Vec<ProcessedPath>,
) -> Result<(SampleBatch, f64)> {
    let observations = concat_series(
        &paths
            .iter()
            .map(|path| &path.path.observations)
            .collect::<Vec<_>>(),
    )
    .context("failed to concatenate observations")?;
    let actions = concat_series(
        &paths
            .iter()
            .map(|path| &path.path.actions)
            .collect::<Vec<_>>(),
    )
    .context("failed to concatenate actions")?;
    let rewards = concat_values(
        &paths
            .iter()
            .map(|path| path.path.rewards.as_slice())
            .collect::<Vec<_>>(),
    );
    let returns = concat_values(
        &paths
            .iter()
            .map(|path| path.returns.as_slice())
            .collect::<Vec<_>>(),
    );
    let mut advantages = concat_values(
        &paths
            .iter()
            .map(|path| path.advantages.as_slice())
            .collect::<Vec<_>>(),
    );
    let env_infos = concat_info_maps(
        &paths
            .iter()
            .map(|path| &path.path.env_infos)
            .collect::<Vec<_>>(),
    )
    .context("failed to concatenate env_infos")?;
    let agent_infos = concat_info_maps(
        &paths
            .iter()
            .map(|path| &path.path.agent_infos)
            .collect::<Vec<_>>(),
    )
    .context("failed to concatenate agent_infos")?;

    if config.center_adv {
        center_advantages(&mut advantages);
    }
    if config.positive_adv {
        shift_advantages_to_positive(&mut advantages, config.advantage_epsilon);
    }

    let entropies = step_entropies(distribution, &agent_infos, advantages.len())?;
    let entropy = stats::mean(&entropies);

    let batch = FlatBatch {
        observations,
        actions,
        rewards,
        returns,
        advantages,
        env_infos,
        agent_infos,
        paths,
    };
    Ok((SampleBatch::Flat(batch), entropy))
}

fn assemble_padded(
    config: &SampleProcessorConfig,
    distribution: &dyn EntropySource,
    paths: Vec<ProcessedPath>,
) -> Result<(SampleBatch, f64)> {
    let lengths = paths.iter().map(ProcessedPath::len).collect::<Vec<_>>();
    let max_len = max_path_length(&lengths)?;

    // Normalize before padding so padded zeros stay out of the statistics.
    let mut per_path_advantages = paths
        .iter()
        .map(|path| path.advantages.clone())
        .collect::<Vec<_>>();
    if config.center_adv {
        let raw = concat_values(
            &per_path_advantages
                .iter()
                .map(Vec::as_slice)
                .collect::<Vec<_>>(),
        );
        let mean = stats::mean(&raw);
        let std_dev = stats::std_dev(&raw) + config.advantage_epsilon;
        for advantages in &mut per_path_advantages {
            for value in advantages.iter_mut() {
                *value = (*value - mean) / std_dev;
            }
        }
    }
    if config.positive_adv {
        let floor = per_path_advantages
            .iter()
            .flatten()
            .copied()
            .fold(f64::INFINITY, f64::min);
        for advantages in &mut per_path_advantages {
            for value in advantages.iter_mut() {
                *value = *value - floor + config.advantage_epsilon;
            }
        }
    }

    let observations = pad_series_n(
        &paths
            .iter()
            .map(|path| &path.path.observations)
            .collect::<Vec<_>>(),
        max_len,
    )
    .context("failed to pad observations")?;
    let actions = pad_series_n(
        &paths.iter().map(|path| &path.path.actions).collect::<Vec<_>>(),
        max_len,
    )
    .context("failed to pad actions")?;
    let advantages = pad_values_n(
        &per_path_advantages.iter().map(Vec::as_slice).collect::<Vec<_>>(),
        max_len,
    )?;
    let rewards = pad_values_n(
        &paths.iter().map(|path| path.path.rewards.as_slice()).collect::<Vec<_>>(),
        max_len,
    )?;
    let returns = pad_values_n(
        &paths.iter().map(|path| path.returns.as_slice()).collect::<Vec<_>>(),
        max_len,
    )?;
    let agent_infos = pad_info_maps(
        &paths.iter().map(|path| &path.path.agent_infos).collect::<Vec<_>>(),
        max_len,
    )
    .context("failed to pad agent_infos")?;
    let env_infos = pad_info_maps(
        &paths.iter().map(|path| &path.path.env_infos).collect::<Vec<_>>(),
        max_len,
    )
    .context("failed to pad env_infos")?;
    let valids = valid_mask(&lengths, max_len)?;

    let flattened_infos = agent_infos
        .iter()
        .map(|(key, tensor)| (key.clone(), tensor.flatten_steps()))
        .collect::<InfoMap>();
    let entropies = step_entropies(distribution, &flattened_infos, valids.as_slice().len())?;
    let entropy = masked_mean(&entropies, &valids);

    let batch = PaddedBatch {
        observations,
        actions,
        advantages,
        rewards,
        returns,
        valids,
        agent_infos,
        env_infos,
        paths,
    };
    Ok((SampleBatch::Padded(batch), entropy))
}

/// Subtracts the batch mean from every advantage.
pub fn center_advantages(advantages: &mut [f64]) {
    let mean = stats::mean(advantages);
    for value in advantages {
        *value -= mean;
    }
}

/// Shifts advantages so the minimum becomes `epsilon`.
pub fn shift_advantages_to_positive(advantages: &mut [f64], epsilon: f64) {
    let floor = stats::min(advantages);
    for value in advantages {
        *value = *value - floor + epsilon;
    }
}

/// Mean of `values` over entries whose mask is positive, weighted by the mask.
///
/// Masked-out entries are skipped rather than multiplied by zero, so a
/// non-finite entropy on a padded step cannot poison the average.
pub fn masked_mean(values: &[f64], mask: &PaddedTensor) -> f64 {
    let (weighted, total) = values
        .iter()
        .zip(mask.as_slice())
        .filter(|(_, weight)| **weight > 0.0)
        .fold((0.0, 0.0), |(weighted, total), (value, weight)| {
            (weighted + value * weight, total + weight)
        });
    if total > 0.0 {
        weighted / total
    } else {
        f64::NAN
    }
}

fn step_entropies(
    distribution: &dyn EntropySource,
    agent_infos: &InfoMap,
    expected: usize,
) -> Result<Vec<f64>> {
    let entropies = distribution
        .entropy(agent_infos)
        .context("policy distribution entropy failed")?;
    if entropies.len() != expected {
        bail!(
            "entropy length mismatch: expected {expected} steps, found {}",
            entropies.len()
        );
    }
    Ok(entropies)
}

fn summarize_paths(paths: &[ProcessedPath]) -> BatchSummary {
    let discounted = paths
        .iter()
        .map(ProcessedPath::discounted_return)
        .collect::<Vec<_>>();
    let discounted_env = paths
        .iter()
        .filter_map(ProcessedPath::discounted_env_return)
        .collect::<Vec<_>>();

    BatchSummary {
        average_discounted_return: stats::mean(&discounted),
        average_discounted_env_return: (!discounted_env.is_empty())
            .then(|| stats::mean(&discounted_env)),
        undiscounted_returns: paths
            .iter()
            .map(ProcessedPath::undiscounted_return)
            .collect(),
        undiscounted_env_returns: paths
            .iter()
            .filter_map(ProcessedPath::undiscounted_env_return)
            .collect(),
        entropy: f64::NAN,
    }
}
