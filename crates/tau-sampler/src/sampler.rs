//! Sampler driver: rollout collection contract plus synchronous sample processing.

use crate::assembler::assemble_batch;
use crate::baseline::Baseline;
use crate::config::SampleProcessorConfig;
use crate::diagnostics::{DiagnosticsSink, SampleDiagnostics};
use crate::gae::estimate_advantages;
use crate::policy::Policy;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tau_training_types::{Path, SampleBatch};

/// Source of trajectories collected under the current policy.
///
/// Implementations may run workers sequentially, in parallel, or remotely.
#[async_trait]
pub trait RolloutWorker: Send {
    /// Prepares workers before the first iteration.
    async fn start_worker(&mut self) -> Result<()>;
    /// Collects the paths for `iteration`.
    async fn obtain_samples(&mut self, iteration: u64) -> Result<Vec<Path>>;
    /// Releases worker resources.
    async fn shutdown_worker(&mut self) -> Result<()>;
}

/// Per-iteration sampler combining rollout collection with batch processing.
pub struct BatchSampler<W, B, P> {
    worker: W,
    baseline: B,
    policy: P,
    config: SampleProcessorConfig,
}

impl<W, B, P> BatchSampler<W, B, P>
where
    W: RolloutWorker,
    B: Baseline,
    P: Policy,
{
    /// Creates a sampler; the config is validated up front.
    pub fn new(worker: W, baseline: B, policy: P, config: SampleProcessorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            worker,
            baseline,
            policy,
            config,
        })
    }

    pub fn config(&self) -> &SampleProcessorConfig {
        &self.config
    }

    pub fn baseline(&self) -> &B {
        &self.baseline
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub async fn start(&mut self) -> Result<()> {
        self.worker.start_worker().await
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.worker.shutdown_worker().await
    }

    /// Collects paths for `iteration` and processes them into a batch.
    pub async fn sample_iteration(
        &mut self,
        iteration: u64,
        sink: &mut dyn DiagnosticsSink,
    ) -> Result<SampleBatch> {
        let paths = self
            .worker
            .obtain_samples(iteration)
            .await
            .with_context(|| format!("failed to obtain samples for iteration {iteration}"))?;
        self.process_samples(iteration, paths, sink)
    }

    /// Estimates advantages, assembles the batch, refits the baseline and
    /// records diagnostics for one iteration.
    #[tracing::instrument(level = "debug", skip(self, paths, sink), fields(paths = paths.len()))]
    pub fn process_samples(
        &mut self,
        iteration: u64,
        paths: Vec<Path>,
        sink: &mut dyn DiagnosticsSink,
    ) -> Result<SampleBatch> {
        process_samples(
            &self.config,
            &mut self.baseline,
            &self.policy,
            iteration,
            paths,
            sink,
        )
    }
}

/// Runs the full processing pipeline for one iteration.
///
/// Baseline fit errors are returned as-is.
pub fn process_samples<B, P>(
    config: &SampleProcessorConfig,
    baseline: &mut B,
    policy: &P,
    iteration: u64,
    paths: Vec<Path>,
    sink: &mut dyn DiagnosticsSink,
) -> Result<SampleBatch>
where
    B: Baseline + ?Sized,
    P: Policy + ?Sized,
{
    let processed = estimate_advantages(config, &*baseline, paths)?;
    let assembled = assemble_batch(config, policy, processed)?;

    tracing::info!(iteration, "fitting baseline");
    baseline.fit_with_samples(assembled.batch.paths(), &assembled.batch)?;
    tracing::info!(iteration, "fitted baseline");

    let diagnostics =
        SampleDiagnostics::compute(iteration, assembled.batch.paths(), &assembled.summary);
    diagnostics.emit(&mut *sink);
    sink.flush()?;
    Ok(assembled.batch)
}
