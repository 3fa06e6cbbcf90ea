//! Orchestration crate for Strata batch execution.

#![warn(clippy::pedantic)]

pub mod batch;
pub mod config;
pub mod errors;
pub mod extract;
pub mod notification;
pub mod notifier;
pub mod orchestrator;
pub mod resolve;
pub mod result;
pub mod transform;

// Re-export public API for convenience
pub use batch::{run_batch, BatchOptions};
pub use errors::PipelineError;
pub use notification::{FlushOnExit, NotificationBatch};
pub use orchestrator::run_pipeline;
pub use resolve::{build_collaborators, Collaborators};
pub use result::{BatchReport, PipelineRun};
