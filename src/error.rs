//! Error taxonomy for the pipeline.
//!
//! Input and configuration problems are fatal and abort a run before any
//! output is written. Join and lookup gaps are not errors; they are resolved
//! with forward fill or the global baseline fallback at the call site.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A declared input path does not exist.
    #[error("required input not found: {}", .0.display())]
    MissingInput(PathBuf),

    /// Aggregation (or a time-window filter) left no rows.
    #[error("aggregation produced no rows")]
    EmptyAggregation,

    /// A persisted snapshot could not be read or violates its schema.
    #[error("snapshot {}: {message}", path.display())]
    Snapshot { path: PathBuf, message: String },

    /// No rows fall before the training cutoff, so no baseline exists.
    #[error("training window is empty; cannot fit a baseline")]
    EmptyTrainingWindow,

    /// The training window contains no zones to forecast for.
    #[error("no zones found in training data")]
    NoZones,

    /// Incremental append re-reduces sums; mean-based aggregates must be
    /// recomputed from raw observations instead.
    #[error("incremental append is only supported for additive count aggregates")]
    AppendNotSupported,

    /// A model artifact does not line up with the serving feature schema.
    #[error("model artifact does not match feature schema: {0}")]
    SchemaMismatch(String),

    /// Any failure on the forecast path: weather fetch, short or malformed
    /// response, or predictor invocation. Carries the underlying cause.
    #[error("forecast generation failed")]
    ForecastFailed(#[source] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Wrap a snapshot read/write failure with its path.
    pub fn snapshot(path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        Self::Snapshot {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}
