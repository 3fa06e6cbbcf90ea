//! Batch-level error model.
//!
//! Per-pipeline failures never surface here: they are folded into
//! [`StepOutcome`](strata_types::StepOutcome) values and reported through
//! the [`BatchReport`](crate::result::BatchReport). A `PipelineError` means
//! the batch itself could not run.

use strata_state::StateError;
use strata_types::{ConfigError, PipelineId};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The config store is unreachable, or it has no active pipelines.
    #[error("pipeline configuration unavailable: {0}")]
    ConfigUnavailable(String),

    /// A pipeline filter named an id with no active pipeline.
    #[error("no active pipeline found with id '{0}'")]
    PipelineNotFound(PipelineId),

    /// The run date did not parse.
    #[error(transparent)]
    InvalidDate(ConfigError),

    /// The audit ledger rejected opening a record.
    #[error("audit ledger unavailable for pipeline '{pipeline}': {source}")]
    AuditUnavailable {
        pipeline: PipelineId,
        #[source]
        source: StateError,
    },

    /// Host-side failure outside any pipeline (task join, resolution, etc.)
    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}

impl PipelineError {
    pub(crate) fn config_unavailable(err: &StateError) -> Self {
        Self::ConfigUnavailable(err.to_string())
    }
}
