//! Shared data types for Tau on-policy sample processing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Error returned when a path or series fails structural validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("path must contain at least one step")]
    EmptyPath,
    #[error("path field '{field}' has length {found}, expected {expected}")]
    LengthMismatch {
        field: String,
        expected: usize,
        found: usize,
    },
    #[error("non-finite values detected in path field '{field}'")]
    NonFinite { field: String },
    #[error("series data length {data_len} is not a multiple of step width {step_width}")]
    InvalidShape { data_len: usize, step_width: usize },
    #[error("series rows must share one width: row {row} has {found}, expected {expected}")]
    RaggedRows {
        row: usize,
        expected: usize,
        found: usize,
    },
}

/// Ordered per-timestep values where every step is a dense block of one shape.
///
/// Scalar channels use an empty `step_shape`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawStepSeries")]
pub struct StepSeries {
    step_shape: Vec<usize>,
    data: Vec<f64>,
}

#[derive(Deserialize)]
struct RawStepSeries {
    step_shape: Vec<usize>,
    data: Vec<f64>,
}

impl TryFrom<RawStepSeries> for StepSeries {
    type Error = PathError;

    fn try_from(raw: RawStepSeries) -> Result<Self, Self::Error> {
        Self::new(raw.step_shape, raw.data)
    }
}

impl StepSeries {
    /// Creates a series from row-major data and a per-step shape.
    pub fn new(step_shape: Vec<usize>, data: Vec<f64>) -> Result<Self, PathError> {
        let step_width = step_shape.iter().product::<usize>();
        let well_formed = if step_width == 0 {
            data.is_empty()
        } else {
            data.len() % step_width == 0
        };
        if !well_formed {
            return Err(PathError::InvalidShape {
                data_len: data.len(),
                step_width,
            });
        }
        Ok(Self { step_shape, data })
    }

    /// Creates a series of scalar steps.
    pub fn scalars(values: Vec<f64>) -> Self {
        Self {
            step_shape: Vec::new(),
            data: values,
        }
    }

    /// Creates a series of flat vector steps; all rows must share one width.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self, PathError> {
        let width = rows.first().map(Vec::len).unwrap_or(0);
        let mut data = Vec::with_capacity(width * rows.len());
        for (row_index, row) in rows.into_iter().enumerate() {
            if row.len() != width {
                return Err(PathError::RaggedRows {
                    row: row_index,
                    expected: width,
                    found: row.len(),
                });
            }
            data.extend(row);
        }
        Self::new(vec![width], data)
    }

    /// Creates `len` steps of zeros with the given per-step shape.
    pub fn zeros(step_shape: Vec<usize>, len: usize) -> Self {
        let step_width = step_shape.iter().product::<usize>();
        Self {
            step_shape,
            data: vec![0.0; step_width * len],
        }
    }

    /// Number of timesteps.
    pub fn len(&self) -> usize {
        match self.step_width() {
            0 => 0,
            width => self.data.len() / width,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn step_shape(&self) -> &[usize] {
        &self.step_shape
    }

    /// Number of `f64` values in one step.
    pub fn step_width(&self) -> usize {
        self.step_shape.iter().product()
    }

    /// Returns the values of step `index`, if present.
    pub fn step(&self, index: usize) -> Option<&[f64]> {
        let width = self.step_width();
        let start = index.checked_mul(width)?;
        self.data.get(start..start + width)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }
}

/// Per-key auxiliary sequences, e.g. action-distribution parameters.
pub type InfoMap = BTreeMap<String, StepSeries>;

/// One trajectory collected under the current policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path {
    pub observations: StepSeries,
    pub actions: StepSeries,
    pub rewards: Vec<f64>,
    #[serde(default)]
    pub agent_infos: InfoMap,
    #[serde(default)]
    pub env_infos: InfoMap,
    /// Secondary reward channel, distinct from the training reward.
    #[serde(default)]
    pub env_rewards: Option<Vec<f64>>,
}

impl Path {
    /// Creates a path without auxiliary infos or env rewards.
    pub fn new(observations: StepSeries, actions: StepSeries, rewards: Vec<f64>) -> Self {
        Self {
            observations,
            actions,
            rewards,
            agent_infos: InfoMap::new(),
            env_infos: InfoMap::new(),
            env_rewards: None,
        }
    }

    pub fn with_agent_info(mut self, key: impl Into<String>, series: StepSeries) -> Self {
        self.agent_infos.insert(key.into(), series);
        self
    }

    pub fn with_env_info(mut self, key: impl Into<String>, series: StepSeries) -> Self {
        self.env_infos.insert(key.into(), series);
        self
    }

    pub fn with_env_rewards(mut self, env_rewards: Vec<f64>) -> Self {
        self.env_rewards = Some(env_rewards);
        self
    }

    /// Number of timesteps, taken from the reward channel.
    pub fn len(&self) -> usize {
        self.rewards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rewards.is_empty()
    }

    /// Checks that every attached sequence shares the path length.
    pub fn validate(&self) -> Result<(), PathError> {
        let expected = self.len();
        if expected == 0 {
            return Err(PathError::EmptyPath);
        }
        ensure_finite("rewards", &self.rewards)?;
        ensure_length("observations", expected, self.observations.len())?;
        ensure_length("actions", expected, self.actions.len())?;
        for (key, series) in &self.agent_infos {
            ensure_length(&format!("agent_infos.{key}"), expected, series.len())?;
        }
        for (key, series) in &self.env_infos {
            ensure_length(&format!("env_infos.{key}"), expected, series.len())?;
        }
        if let Some(env_rewards) = &self.env_rewards {
            ensure_length("env_rewards", expected, env_rewards.len())?;
            ensure_finite("env_rewards", env_rewards)?;
        }
        Ok(())
    }
}

/// A path augmented with the fields computed during sample processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedPath {
    pub path: Path,
    /// Baseline predictions for each real step (no bootstrap entry).
    pub baselines: Vec<f64>,
    pub advantages: Vec<f64>,
    pub returns: Vec<f64>,
    pub env_returns: Option<Vec<f64>>,
}

impl ProcessedPath {
    pub fn len(&self) -> usize {
        self.path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }

    /// Discounted return seen from the first state.
    pub fn discounted_return(&self) -> f64 {
        self.returns.first().copied().unwrap_or(f64::NAN)
    }

    /// Discounted env return seen from the first state, when env rewards exist.
    pub fn discounted_env_return(&self) -> Option<f64> {
        self.env_returns
            .as_ref()
            .and_then(|returns| returns.first().copied())
    }

    /// Plain sum of training rewards.
    pub fn undiscounted_return(&self) -> f64 {
        self.path.rewards.iter().sum()
    }

    /// Plain sum of env rewards, when present.
    pub fn undiscounted_env_return(&self) -> Option<f64> {
        self.path
            .env_rewards
            .as_ref()
            .map(|rewards| rewards.iter().sum())
    }
}

/// Stacked `[num_paths, max_path_length, step_shape...]` tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPaddedTensor")]
pub struct PaddedTensor {
    num_paths: usize,
    max_path_length: usize,
    step_shape: Vec<usize>,
    data: Vec<f64>,
}

#[derive(Deserialize)]
struct RawPaddedTensor {
    num_paths: usize,
    max_path_length: usize,
    step_shape: Vec<usize>,
    data: Vec<f64>,
}

impl TryFrom<RawPaddedTensor> for PaddedTensor {
    type Error = PathError;

    fn try_from(raw: RawPaddedTensor) -> Result<Self, Self::Error> {
        Self::new(raw.num_paths, raw.max_path_length, raw.step_shape, raw.data)
    }
}

impl PaddedTensor {
    /// Wraps row-major data; the data length must match the declared shape.
    pub fn new(
        num_paths: usize,
        max_path_length: usize,
        step_shape: Vec<usize>,
        data: Vec<f64>,
    ) -> Result<Self, PathError> {
        let expected = num_paths * max_path_length * step_shape.iter().product::<usize>();
        if data.len() != expected {
            return Err(PathError::LengthMismatch {
                field: "padded_tensor".to_string(),
                expected,
                found: data.len(),
            });
        }
        Ok(Self {
            num_paths,
            max_path_length,
            step_shape,
            data,
        })
    }

    pub fn num_paths(&self) -> usize {
        self.num_paths
    }

    pub fn max_path_length(&self) -> usize {
        self.max_path_length
    }

    pub fn step_shape(&self) -> &[usize] {
        &self.step_shape
    }

    /// Full shape, leading path and time dimensions first.
    pub fn shape(&self) -> Vec<usize> {
        let mut shape = vec![self.num_paths, self.max_path_length];
        shape.extend_from_slice(&self.step_shape);
        shape
    }

    /// Values at `(path, step)`.
    pub fn at(&self, path: usize, step: usize) -> Option<&[f64]> {
        if path >= self.num_paths || step >= self.max_path_length {
            return None;
        }
        let width = self.step_shape.iter().product::<usize>();
        let start = (path * self.max_path_length + step) * width;
        self.data.get(start..start + width)
    }

    /// One path's padded row as a series of `max_path_length` steps.
    pub fn row(&self, path: usize) -> Option<StepSeries> {
        if path >= self.num_paths {
            return None;
        }
        let width = self.step_shape.iter().product::<usize>();
        let row_len = self.max_path_length * width;
        let start = path * row_len;
        let data = self.data.get(start..start + row_len)?;
        Some(StepSeries {
            step_shape: self.step_shape.clone(),
            data: data.to_vec(),
        })
    }

    /// Collapses the path and time dimensions into one step axis.
    pub fn flatten_steps(&self) -> StepSeries {
        StepSeries {
            step_shape: self.step_shape.clone(),
            data: self.data.clone(),
        }
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }
}

/// Batch layout for non-recurrent policies: every channel concatenated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatBatch {
    pub observations: StepSeries,
    pub actions: StepSeries,
    pub rewards: Vec<f64>,
    pub returns: Vec<f64>,
    pub advantages: Vec<f64>,
    pub env_infos: InfoMap,
    pub agent_infos: InfoMap,
    pub paths: Vec<ProcessedPath>,
}

/// Batch layout for recurrent policies: every channel padded and stacked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaddedBatch {
    pub observations: PaddedTensor,
    pub actions: PaddedTensor,
    pub advantages: PaddedTensor,
    pub rewards: PaddedTensor,
    pub returns: PaddedTensor,
    /// 1.0 for real timesteps, 0.0 for padding.
    pub valids: PaddedTensor,
    pub agent_infos: BTreeMap<String, PaddedTensor>,
    pub env_infos: BTreeMap<String, PaddedTensor>,
    pub paths: Vec<ProcessedPath>,
}

/// Training batch handed back to the algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "layout", rename_all = "snake_case")]
pub enum SampleBatch {
    Flat(FlatBatch),
    Padded(PaddedBatch),
}

impl SampleBatch {
    pub fn paths(&self) -> &[ProcessedPath] {
        match self {
            Self::Flat(batch) => &batch.paths,
            Self::Padded(batch) => &batch.paths,
        }
    }

    pub fn is_padded(&self) -> bool {
        matches!(self, Self::Padded(_))
    }

    /// Total number of real timesteps across paths.
    pub fn step_count(&self) -> usize {
        self.paths().iter().map(ProcessedPath::len).sum()
    }

    pub fn as_flat(&self) -> Option<&FlatBatch> {
        match self {
            Self::Flat(batch) => Some(batch),
            Self::Padded(_) => None,
        }
    }

    pub fn as_padded(&self) -> Option<&PaddedBatch> {
        match self {
            Self::Flat(_) => None,
            Self::Padded(batch) => Some(batch),
        }
    }
}

fn ensure_length(field: &str, expected: usize, found: usize) -> Result<(), PathError> {
    if expected == found {
        return Ok(());
    }
    Err(PathError::LengthMismatch {
        field: field.to_string(),
        expected,
        found,
    })
}

fn ensure_finite(field: &str, values: &[f64]) -> Result<(), PathError> {
    if values.iter().all(|value| value.is_finite()) {
        return Ok(());
    }
    Err(PathError::NonFinite {
        field: field.to_string(),
    })
}
