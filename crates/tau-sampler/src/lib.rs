//! On-policy sample processing: GAE advantages, batch assembly, and diagnostics.

mod assembler;
mod baseline;
mod config;
mod diagnostics;
mod discount;
mod gae;
mod policy;
mod sampler;
mod stats;
pub mod tensor_ops;

pub use assembler::{
    assemble_batch, center_advantages, masked_mean, shift_advantages_to_positive,
    AssembledBatch, BatchSummary,
};
pub use baseline::{Baseline, ZeroBaseline};
pub use config::SampleProcessorConfig;
pub use diagnostics::{
    explained_variance, DiagnosticValue, DiagnosticsSink, DiagnosticsSnapshot, ReturnStats,
    SampleDiagnostics, TabularRecorder, TracingSink,
};
pub use discount::discount_cumsum;
pub use gae::{compute_path_advantages, estimate_advantages};
pub use policy::{Categorical, DiagonalGaussian, EntropySource, Policy, PolicyHandle};
pub use sampler::{process_samples, BatchSampler, RolloutWorker};
pub use tau_training_types::{
    FlatBatch, InfoMap, PaddedBatch, PaddedTensor, Path, PathError, ProcessedPath, SampleBatch,
    StepSeries,
};
