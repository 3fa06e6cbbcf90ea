//! Two-phase batch driver.
//!
//! Phase 1 lands every active pipeline's source data into staging, one
//! pipeline at a time. Phase 2 runs a single transformation across all
//! models. The consolidated report is flushed exactly once however the
//! batch ends.

use std::panic::{catch_unwind, AssertUnwindSafe};

use strata_types::{FailureKind, LoadType, NotificationStatus, PipelineId, RunDate, StepOutcome};
use tokio_util::sync::CancellationToken;

use crate::errors::PipelineError;
use crate::notification::FlushOnExit;
use crate::orchestrator::{panic_message, run_pipeline};
use crate::resolve::Collaborators;
use crate::result::BatchReport;
use crate::transform::TransformRequest;

/// Notification id under which the Phase 2 outcome is reported.
pub const TRANSFORM_PHASE_ID: &str = "batch_transform";

/// Operator options for one batch.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Run date as typed by the operator; `None` reads undated prefixes.
    pub date: Option<String>,
    /// Restrict the batch to a single pipeline.
    pub pipeline_id: Option<PipelineId>,
    /// Override every pipeline's load type.
    pub load_type: Option<LoadType>,
    /// Skip Phase 1 and only transform.
    pub skip_load: bool,
}

/// Run one batch to completion or cancellation.
///
/// # Errors
///
/// Fails before any work when the date is invalid, the config store is
/// unreachable, no pipeline is active, or the filter matches nothing.
/// Fails mid-batch only when the audit ledger cannot open a record. The
/// report of whatever ran is flushed in every case.
pub fn run_batch(
    ctx: &Collaborators,
    options: &BatchOptions,
    cancel: &CancellationToken,
) -> Result<BatchReport, PipelineError> {
    let mut batch = FlushOnExit::new(ctx.notifier.as_ref());

    let date = options
        .date
        .as_deref()
        .map(RunDate::parse)
        .transpose()
        .map_err(PipelineError::InvalidDate)?;

    let configs = ctx
        .provider
        .active_pipelines(options.pipeline_id.as_ref())
        .map_err(|e| PipelineError::config_unavailable(&e))?;
    if configs.is_empty() {
        return Err(match &options.pipeline_id {
            Some(id) => PipelineError::PipelineNotFound(id.clone()),
            None => PipelineError::ConfigUnavailable("no active pipelines configured".into()),
        });
    }

    let mut report = BatchReport {
        date,
        ..BatchReport::default()
    };

    tracing::info!(
        pipelines = configs.len(),
        date = %date.map_or_else(|| "undated".to_string(), |d| d.to_string()),
        skip_load = options.skip_load,
        "Starting batch"
    );

    if options.skip_load {
        tracing::info!("Skipping load phase");
    } else {
        tracing::info!("Phase 1: loading source data to staging");
        for config in &configs {
            if cancel.is_cancelled() {
                tracing::warn!(pipeline = %config.id, "Cancelled, skipping remaining pipelines");
                report.cancelled = true;
                break;
            }
            let landing = config.for_landing(options.load_type);
            let run = run_pipeline(ctx, &landing, date, true, &mut batch)?;
            report.runs.push(run);
        }
        tracing::info!(
            succeeded = report.runs.iter().filter(|r| r.is_success()).count(),
            failed = report.runs.iter().filter(|r| !r.is_success()).count(),
            "Phase 1 complete"
        );
    }

    if !report.cancelled && cancel.is_cancelled() {
        tracing::warn!("Cancelled before transform phase");
        report.cancelled = true;
    }

    if !report.cancelled {
        tracing::info!("Phase 2: transforming all models");
        let request = TransformRequest::all_models(options.load_type == Some(LoadType::Full));
        let outcome = catch_unwind(AssertUnwindSafe(|| ctx.transformer.run(&request)))
            .unwrap_or_else(|panic| {
                StepOutcome::failure(
                    FailureKind::Unexpected,
                    format!("Transformation failed: {}", panic_message(panic.as_ref())),
                )
            });
        record_transform(&mut batch, &outcome);
        report.transform = Some(outcome);
    }

    report.notification_sent = batch.finish();
    tracing::info!(
        succeeded = report.succeeded(),
        failed = report.failed(),
        audit_write_failures = report.audit_write_failures(),
        cancelled = report.cancelled,
        "Batch complete"
    );
    Ok(report)
}

fn record_transform(batch: &mut FlushOnExit<'_>, outcome: &StepOutcome) {
    let id = PipelineId::new(TRANSFORM_PHASE_ID);
    match outcome {
        StepOutcome::Success { rows } => {
            tracing::info!(rows, "Transformation completed");
            batch.record_outcome(
                &id,
                NotificationStatus::Success,
                Some("Transformation completed"),
                Some(*rows),
                None,
            );
        }
        StepOutcome::Failure { kind, message } => {
            tracing::error!(%kind, error = %message, "Transformation failed");
            batch.record_outcome(
                &id,
                NotificationStatus::Failure,
                None,
                None,
                Some(message.as_str()),
            );
        }
    }
}
