//! Sample-processing configuration owned by the training algorithm.

use anyhow::{bail, Context, Result};
use serde_json::Value;

/// Discounting and advantage post-processing settings for one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleProcessorConfig {
    /// Reward discount factor.
    pub discount: f64,
    /// GAE trace decay coefficient.
    pub gae_lambda: f64,
    /// Center advantages on the batch mean (normalize in padded layout).
    pub center_adv: bool,
    /// Shift advantages so the minimum becomes `advantage_epsilon`.
    pub positive_adv: bool,
    /// Small positive floor used by shifting and std normalization.
    pub advantage_epsilon: f64,
}

impl Default for SampleProcessorConfig {
    fn default() -> Self {
        Self {
            discount: 0.99,
            gae_lambda: 1.0,
            center_adv: true,
            positive_adv: false,
            advantage_epsilon: 1e-8,
        }
    }
}

impl SampleProcessorConfig {
    /// Parses `SampleProcessorConfig` from a JSON object.
    #[tracing::instrument(level = "debug", skip(value))]
    pub fn from_json(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .context("sampler config JSON payload must be an object")?;
        let mut config = Self::default();

        if let Some(discount) = object.get("discount") {
            config.discount = discount
                .as_f64()
                .context("sampler config field 'discount' must be numeric")?;
        }
        if let Some(gae_lambda) = object.get("gae_lambda") {
            config.gae_lambda = gae_lambda
                .as_f64()
                .context("sampler config field 'gae_lambda' must be numeric")?;
        }
        if let Some(center_adv) = object.get("center_adv") {
            config.center_adv = center_adv
                .as_bool()
                .context("sampler config field 'center_adv' must be boolean")?;
        }
        if let Some(positive_adv) = object.get("positive_adv") {
            config.positive_adv = positive_adv
                .as_bool()
                .context("sampler config field 'positive_adv' must be boolean")?;
        }
        if let Some(advantage_epsilon) = object.get("advantage_epsilon") {
            config.advantage_epsilon = advantage_epsilon
                .as_f64()
                .context("sampler config field 'advantage_epsilon' must be numeric")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejects out-of-range discounting or epsilon settings.
    pub fn validate(&self) -> Result<()> {
        validate_probability("discount", self.discount)?;
        validate_probability("gae_lambda", self.gae_lambda)?;
        if !self.advantage_epsilon.is_finite() || self.advantage_epsilon <= 0.0 {
            bail!("sampler config field 'advantage_epsilon' must be finite and > 0.0");
        }
        Ok(())
    }
}

fn validate_probability(label: &str, value: f64) -> Result<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        bail!("sampler config field '{label}' must be finite and within [0.0, 1.0]");
    }
    Ok(())
}
