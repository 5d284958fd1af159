//! Value-function baseline contract used by advantage estimation.

use anyhow::Result;
use tau_training_types::{Path, ProcessedPath, SampleBatch};

/// Learned state-value approximator consulted before and refit after processing.
///
/// Implementations that can predict many paths at once override `predict_n`;
/// implementations that want the assembled batch override `fit_with_samples`.
pub trait Baseline {
    /// Predicts one value per step of `path`.
    fn predict(&self, path: &Path) -> Result<Vec<f64>>;

    /// Predicts values for every path, in order.
    fn predict_n(&self, paths: &[Path]) -> Result<Vec<Vec<f64>>> {
        paths.iter().map(|path| self.predict(path)).collect()
    }

    /// Refits on processed paths.
    fn fit(&mut self, paths: &[ProcessedPath]) -> Result<()>;

    /// Refits with access to the assembled batch. Falls back to `fit`.
    fn fit_with_samples(&mut self, paths: &[ProcessedPath], _batch: &SampleBatch) -> Result<()> {
        self.fit(paths)
    }
}

/// Baseline that predicts zero everywhere and learns nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZeroBaseline;

impl Baseline for ZeroBaseline {
    fn predict(&self, path: &Path) -> Result<Vec<f64>> {
        Ok(vec![0.0; path.len()])
    }

    fn predict_n(&self, paths: &[Path]) -> Result<Vec<Vec<f64>>> {
        Ok(paths.iter().map(|path| vec![0.0; path.len()]).collect())
    }

    fn fit(&mut self, _paths: &[ProcessedPath]) -> Result<()> {
        Ok(())
    }
}
