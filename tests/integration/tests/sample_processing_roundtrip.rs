use std::collections::VecDeque;
use std::sync::Once;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tau_sampler::{
    BatchSampler, Categorical, DiagnosticValue, Path, PolicyHandle, RolloutWorker,
    SampleProcessorConfig, TabularRecorder, TracingSink, ZeroBaseline,
};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let env_filter = EnvFilter::builder()
            .with_default_directive(LevelFilter::WARN.into())
            .from_env_lossy();
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .with_test_writer()
            .try_init();
    });
}

/// Replays pre-recorded iterations of paths.
struct QueuedWorker {
    iterations: VecDeque<Vec<Path>>,
    running: bool,
}

impl QueuedWorker {
    fn new(iterations: Vec<Vec<Path>>) -> Self {
        Self {
            iterations: VecDeque::from(iterations),
            running: false,
        }
    }
}

#[async_trait]
impl RolloutWorker for QueuedWorker {
    async fn start_worker(&mut self) -> Result<()> {
        self.running = true;
        Ok(())
    }

    async fn obtain_samples(&mut self, iteration: u64) -> Result<Vec<Path>> {
        anyhow::ensure!(self.running, "worker not started");
        self.iterations
            .pop_front()
            .with_context(|| format!("no recorded paths for iteration {iteration}"))
    }

    async fn shutdown_worker(&mut self) -> Result<()> {
        self.running = false;
        Ok(())
    }
}

fn categorical_path(rewards: &[f64], env_rewards: Option<&[f64]>) -> Result<Path> {
    let len = rewards.len();
    let mut payload = json!({
        "observations": {"step_shape": [2], "data": vec![0.5; len * 2]},
        "actions": {"step_shape": [], "data": vec![1.0; len]},
        "rewards": rewards,
        "agent_infos": {
            "prob": {"step_shape": [2], "data": vec![0.5; len * 2]}
        },
        "env_infos": {
            "distance": {"step_shape": [], "data": vec![0.0; len]}
        }
    });
    if let Some(env_rewards) = env_rewards {
        payload["env_rewards"] = json!(env_rewards);
    }
    Ok(serde_json::from_value::<Path>(payload)?)
}

fn two_path_iteration() -> Result<Vec<Path>> {
    Ok(vec![
        categorical_path(&[1.0, 1.0, 1.0], None)?,
        categorical_path(&[2.0, 0.0], None)?,
    ])
}

fn undiscounted_config() -> Result<SampleProcessorConfig> {
    SampleProcessorConfig::from_json(&json!({
        "discount": 1.0,
        "gae_lambda": 1.0,
        "center_adv": false,
        "positive_adv": false
    }))
}

fn scalar(recorder: &TabularRecorder, key: &str) -> Option<f64> {
    match recorder.latest()?.values.get(key)? {
        DiagnosticValue::Scalar(value) => Some(*value),
        _ => None,
    }
}

#[tokio::test]
async fn integration_feed_forward_iteration_concatenates_paths() -> Result<()> {
    init_tracing();
    let mut sampler = BatchSampler::new(
        QueuedWorker::new(vec![two_path_iteration()?]),
        ZeroBaseline,
        PolicyHandle::feed_forward(Categorical),
        undiscounted_config()?,
    )?;
    let mut recorder = TabularRecorder::new();

    sampler.start().await?;
    let batch = sampler.sample_iteration(0, &mut recorder).await?;
    sampler.shutdown().await?;

    let flat = batch.as_flat().context("feed-forward policy yields a flat batch")?;
    assert_eq!(flat.rewards, vec![1.0, 1.0, 1.0, 2.0, 0.0]);
    assert_eq!(flat.returns, vec![3.0, 2.0, 1.0, 2.0, 0.0]);
    assert_eq!(flat.advantages, flat.returns);
    assert_eq!(flat.observations.len(), 5);
    assert_eq!(flat.env_infos["distance"].len(), 5);

    assert_eq!(scalar(&recorder, "AverageDiscountedReturn"), Some(2.5));
    assert_eq!(scalar(&recorder, "AverageReturn"), Some(2.5));
    let entropy = scalar(&recorder, "Entropy").context("entropy recorded")?;
    assert!((entropy - 2.0f64.ln()).abs() < 1e-6);
    assert_eq!(scalar(&recorder, "AverageEnvReturn"), None);
    Ok(())
}

#[tokio::test]
async fn integration_recurrent_iteration_pads_paths_and_masks_entropy() -> Result<()> {
    init_tracing();
    let mut sampler = BatchSampler::new(
        QueuedWorker::new(vec![two_path_iteration()?]),
        ZeroBaseline,
        PolicyHandle::recurrent(Categorical),
        undiscounted_config()?,
    )?;
    let mut recorder = TabularRecorder::new();

    sampler.start().await?;
    let batch = sampler.sample_iteration(0, &mut recorder).await?;
    sampler.shutdown().await?;

    let padded = batch
        .as_padded()
        .context("recurrent policy yields a padded batch")?;
    assert_eq!(padded.rewards.shape(), vec![2, 3]);
    assert_eq!(padded.rewards.as_slice(), &[1.0, 1.0, 1.0, 2.0, 0.0, 0.0]);
    assert_eq!(padded.valids.as_slice(), &[1.0, 1.0, 1.0, 1.0, 1.0, 0.0]);
    assert_eq!(padded.observations.shape(), vec![2, 3, 2]);
    assert_eq!(padded.agent_infos["prob"].at(1, 2), Some(&[0.0, 0.0][..]));

    // Padded steps carry all-zero probabilities and must not dilute the mean.
    let entropy = scalar(&recorder, "Entropy").context("entropy recorded")?;
    assert!((entropy - 2.0f64.ln()).abs() < 1e-6);
    Ok(())
}

#[tokio::test]
async fn integration_multiple_iterations_emit_env_channel_when_present() -> Result<()> {
    init_tracing();
    let iterations = vec![
        two_path_iteration()?,
        vec![
            categorical_path(&[1.0, 0.0], Some(&[0.0, 3.0]))?,
            categorical_path(&[0.5], None)?,
        ],
    ];
    let mut sampler = BatchSampler::new(
        QueuedWorker::new(iterations),
        ZeroBaseline,
        PolicyHandle::feed_forward(Categorical),
        SampleProcessorConfig::default(),
    )?;
    let mut recorder = TabularRecorder::new();

    sampler.start().await?;
    for iteration in 0..2 {
        sampler.sample_iteration(iteration, &mut recorder).await?;
    }
    let exhausted = sampler.sample_iteration(2, &mut recorder).await;
    sampler.shutdown().await?;

    assert_eq!(recorder.history().len(), 2);
    let first = &recorder.history()[0].values;
    assert!(!first.contains_key("AverageEnvReturn"));
    assert_eq!(scalar(&recorder, "AverageEnvReturn"), Some(3.0));
    assert_eq!(scalar(&recorder, "MaxEnvReturn"), Some(3.0));
    assert!(scalar(&recorder, "AverageDiscountedEnvReturn").is_some());

    let error = exhausted.expect_err("third iteration has no recorded paths");
    assert!(format!("{error:#}").contains("no recorded paths"));
    Ok(())
}

#[tokio::test]
async fn integration_tracing_sink_accepts_iteration_diagnostics() -> Result<()> {
    init_tracing();
    let mut sampler = BatchSampler::new(
        QueuedWorker::new(vec![two_path_iteration()?]),
        ZeroBaseline,
        PolicyHandle::recurrent(Categorical),
        SampleProcessorConfig::default(),
    )?;
    let mut sink = TracingSink::default();

    sampler.start().await?;
    let batch = sampler.sample_iteration(0, &mut sink).await?;
    sampler.shutdown().await?;

    assert_eq!(batch.step_count(), 5);
    Ok(())
}

#[test]
fn integration_invalid_path_payload_is_rejected_before_processing() -> Result<()> {
    let payload: Value = json!({
        "observations": {"step_shape": [1], "data": [0.0]},
        "actions": {"step_shape": [], "data": [0.0, 1.0]},
        "rewards": [1.0, 1.0]
    });
    let path = serde_json::from_value::<Path>(payload)?;
    let mut recorder = TabularRecorder::new();
    let error = tau_sampler::process_samples(
        &SampleProcessorConfig::default(),
        &mut ZeroBaseline,
        &PolicyHandle::feed_forward(Categorical),
        0,
        vec![path],
        &mut recorder,
    )
    .expect_err("observation length mismatch must fail");
    assert!(format!("{error:#}").contains("observations"));
    Ok(())
}
