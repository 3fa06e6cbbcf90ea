//! Shared Strata model types: pipeline configuration, audit records,
//! step outcomes, and notification events.
//!
//! This crate has no I/O and is safe to depend on from every other crate
//! in the workspace.

#![warn(clippy::pedantic)]

pub mod error;
pub mod notification;
pub mod outcome;
pub mod pipeline;
pub mod state;

pub use error::ConfigError;
pub use notification::{NotificationEvent, NotificationStatus};
pub use outcome::{FailureKind, StepOutcome};
pub use pipeline::{LoadType, PipelineConfig, PipelineLayer, RawPipelineRow, RunDate};
pub use state::{AuditDetails, AuditId, AuditRecord, AuditStatus, PipelineId};
