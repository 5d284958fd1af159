//! Policy and action-distribution capabilities consumed by batch assembly.

use anyhow::{bail, Context, Result};
use std::f64::consts::{E, PI};
use tau_training_types::InfoMap;

/// Per-timestep entropy of an action distribution given its parameters.
pub trait EntropySource {
    /// Returns one entropy value per step in `agent_infos`.
    fn entropy(&self, agent_infos: &InfoMap) -> Result<Vec<f64>>;
}

/// Policy facts the sampler needs: layout and action distribution.
pub trait Policy {
    /// True when the policy carries state across timesteps.
    fn is_recurrent(&self) -> bool;

    fn distribution(&self) -> &dyn EntropySource;
}

/// Minimal policy handle pairing a recurrence flag with a distribution.
#[derive(Debug, Clone)]
pub struct PolicyHandle<D> {
    pub recurrent: bool,
    pub distribution: D,
}

impl<D> PolicyHandle<D> {
    pub fn feed_forward(distribution: D) -> Self {
        Self {
            recurrent: false,
            distribution,
        }
    }

    pub fn recurrent(distribution: D) -> Self {
        Self {
            recurrent: true,
            distribution,
        }
    }
}

impl<D: EntropySource> Policy for PolicyHandle<D> {
    fn is_recurrent(&self) -> bool {
        self.recurrent
    }

    fn distribution(&self) -> &dyn EntropySource {
        &self.distribution
    }
}

/// Diagonal Gaussian parameterized by the `log_std` agent info.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiagonalGaussian;

impl EntropySource for DiagonalGaussian {
    fn entropy(&self, agent_infos: &InfoMap) -> Result<Vec<f64>> {
        let log_std = agent_infos
            .get("log_std")
            .context("diagonal gaussian entropy requires agent info 'log_std'")?;
        let per_dimension = (2.0 * PI * E).sqrt().ln();
        Ok((0..log_std.len())
            .filter_map(|index| log_std.step(index))
            .map(|step| step.iter().map(|value| value + per_dimension).sum::<f64>())
            .collect())
    }
}

/// Categorical distribution parameterized by the `prob` agent info.
#[derive(Debug, Default, Clone, Copy)]
pub struct Categorical;

const TINY: f64 = 1e-8;

impl EntropySource for Categorical {
    fn entropy(&self, agent_infos: &InfoMap) -> Result<Vec<f64>> {
        let prob = agent_infos
            .get("prob")
            .context("categorical entropy requires agent info 'prob'")?;
        if prob.step_width() == 0 {
            bail!("categorical agent info 'prob' must have at least one category");
        }
        Ok((0..prob.len())
            .filter_map(|index| prob.step(index))
            .map(|step| -step.iter().map(|p| p * (p + TINY).ln()).sum::<f64>())
            .collect())
    }
}
