//! Pipeline orchestrator: drives one pipeline through
//! extract, transform, audit and notify.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use chrono::Local;
use strata_state::StateError;
use strata_types::{
    AuditId, AuditStatus, FailureKind, NotificationStatus, PipelineConfig, RunDate, StepOutcome,
};

use crate::errors::PipelineError;
use crate::extract::SourceRef;
use crate::notification::NotificationBatch;
use crate::resolve::Collaborators;
use crate::result::PipelineRun;
use crate::transform::TransformRequest;

pub(crate) const SUCCESS_MESSAGE: &str = "Pipeline completed successfully";

/// Outcome of the lifecycle steps plus the row count to record on the
/// audit entry.
struct Attempt {
    outcome: StepOutcome,
    audit_rows: u64,
}

impl Attempt {
    fn failed(kind: FailureKind, message: impl Into<String>, audit_rows: u64) -> Self {
        Self {
            outcome: StepOutcome::failure(kind, message),
            audit_rows,
        }
    }
}

/// Run one pipeline and record its outcome in `batch`.
///
/// Every step failure, including a panic escaping a collaborator, closes
/// the audit record as `failed` and records a failure event. Only a ledger
/// that cannot open a record aborts the call, in which case nothing is
/// recorded.
///
/// # Errors
///
/// Returns [`PipelineError::AuditUnavailable`] if no audit record could be
/// opened.
pub fn run_pipeline(
    ctx: &Collaborators,
    config: &PipelineConfig,
    date: Option<RunDate>,
    skip_transform: bool,
    batch: &mut NotificationBatch,
) -> Result<PipelineRun, PipelineError> {
    tracing::info!(
        pipeline = %config.id,
        data_source = %config.data_source,
        source_table = %config.source_table,
        destination = %format!("{}.{}", config.layer, config.destination_table),
        load_type = %config.load_type,
        "Starting pipeline"
    );

    let audit_id = open_audit(ctx, config).map_err(|source| PipelineError::AuditUnavailable {
        pipeline: config.id.clone(),
        source,
    })?;

    let attempt = catch_unwind(AssertUnwindSafe(|| {
        execute_steps(ctx, config, date, skip_transform)
    }))
    .unwrap_or_else(|panic| {
        let message = format!("Pipeline failed: {}", panic_message(panic.as_ref()));
        tracing::error!(pipeline = %config.id, error = %message, "Unexpected fault");
        Attempt::failed(FailureKind::Unexpected, message, 0)
    });

    let audit_error = close_audit(ctx, audit_id, &attempt).err();
    if let Some(err) = &audit_error {
        tracing::error!(
            pipeline = %config.id,
            audit_id = %audit_id,
            error = %err,
            "Failed to close audit record"
        );
    }

    record_event(batch, config, &attempt.outcome, audit_error.as_deref());

    match &attempt.outcome {
        StepOutcome::Success { rows } => {
            tracing::info!(pipeline = %config.id, rows, "Pipeline completed");
        }
        StepOutcome::Failure { kind, message } => {
            tracing::error!(pipeline = %config.id, %kind, error = %message, "Pipeline failed");
        }
    }

    Ok(PipelineRun {
        pipeline_id: config.id.clone(),
        audit_id,
        outcome: attempt.outcome,
        audit_error,
    })
}

fn open_audit(ctx: &Collaborators, config: &PipelineConfig) -> Result<AuditId, StateError> {
    catch_unwind(AssertUnwindSafe(|| ctx.ledger.open(&config.id))).unwrap_or_else(|panic| {
        Err(StateError::backend(format!(
            "ledger panicked: {}",
            panic_message(panic.as_ref())
        )))
    })
}

fn close_audit(ctx: &Collaborators, audit_id: AuditId, attempt: &Attempt) -> Result<(), String> {
    let status = if attempt.outcome.is_success() {
        AuditStatus::Completed
    } else {
        AuditStatus::Failed
    };
    let error = attempt.outcome.error();
    catch_unwind(AssertUnwindSafe(|| {
        ctx.ledger
            .close(audit_id, status, Some(attempt.audit_rows), error)
    }))
    .map_err(|panic| format!("ledger panicked: {}", panic_message(panic.as_ref())))?
    .map(|_| ())
    .map_err(|e| e.to_string())
}

fn execute_steps(
    ctx: &Collaborators,
    config: &PipelineConfig,
    date: Option<RunDate>,
    skip_transform: bool,
) -> Attempt {
    let mut rows = 0;

    if config.layer.requires_extraction() {
        let source = SourceRef::new(&ctx.source_bucket, date, &config.data_source);
        tracing::info!(pipeline = %config.id, source = %source, "Extracting to staging");
        match ctx
            .extractor
            .load(&source, &config.source_table, config.load_type)
        {
            StepOutcome::Success { rows: loaded } => rows = loaded,
            StepOutcome::Failure { kind, message } => {
                return Attempt::failed(kind, message, 0);
            }
        }
    } else {
        tracing::info!(
            pipeline = %config.id,
            layer = %config.layer,
            "Using existing staged data"
        );
    }

    if skip_transform {
        if config.layer.requires_transform() {
            return Attempt::failed(
                FailureKind::Transformation,
                format!(
                    "transformation skipped for layer '{}' that requires it",
                    config.layer
                ),
                rows,
            );
        }
    } else {
        let request = TransformRequest::for_pipeline(config, Local::now().date_naive());
        tracing::info!(
            pipeline = %config.id,
            selector = request.selector.as_deref(),
            "Transforming"
        );
        match ctx.transformer.run(&request) {
            StepOutcome::Success { rows: transformed } => rows = transformed,
            StepOutcome::Failure { kind, message } => {
                return Attempt::failed(kind, message, rows);
            }
        }
    }

    Attempt {
        outcome: StepOutcome::success(rows),
        audit_rows: rows,
    }
}

fn record_event(
    batch: &mut NotificationBatch,
    config: &PipelineConfig,
    outcome: &StepOutcome,
    audit_error: Option<&str>,
) {
    match outcome {
        StepOutcome::Success { rows } => {
            let message = match audit_error {
                Some(err) => format!("{SUCCESS_MESSAGE} (audit write failed: {err})"),
                None => SUCCESS_MESSAGE.to_string(),
            };
            batch.record_outcome(
                &config.id,
                NotificationStatus::Success,
                Some(message.as_str()),
                Some(*rows),
                None,
            );
        }
        StepOutcome::Failure { message, .. } => {
            let error = match audit_error {
                Some(err) => format!("{message} (audit write failed: {err})"),
                None => message.clone(),
            };
            batch.record_outcome(
                &config.id,
                NotificationStatus::Failure,
                None,
                None,
                Some(error.as_str()),
            );
        }
    }
}

/// Text carried by a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
