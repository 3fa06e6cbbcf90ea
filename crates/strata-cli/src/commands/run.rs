use std::path::Path;

use anyhow::{Context, Result};
use strata_engine::resolve::build_collaborators;
use strata_engine::{run_batch, BatchOptions, BatchReport, PipelineError};
use strata_types::StepOutcome;
use tokio_util::sync::CancellationToken;

/// Execute the `run` command: build collaborators and drive one batch.
pub async fn execute(config_path: &Path, options: BatchOptions) -> Result<()> {
    let config = super::load_config(config_path)?;

    tracing::info!(
        state = ?config.state.backend,
        bucket = %config.source.bucket.display(),
        staging = %config.staging.path.display(),
        "Run config validated"
    );

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current pipeline");
            signal_token.cancel();
        }
    });

    let report = tokio::task::spawn_blocking(move || -> Result<BatchReport, PipelineError> {
        let ctx = build_collaborators(&config)?;
        run_batch(&ctx, &options, &cancel)
    })
    .await
    .context("Batch task panicked")??;

    print_summary(&report);

    if report.is_success() {
        Ok(())
    } else if report.cancelled {
        anyhow::bail!("Batch cancelled")
    } else {
        anyhow::bail!(
            "Batch finished with {} failure(s) and {} audit write failure(s)",
            report.failed(),
            report.audit_write_failures()
        )
    }
}

fn print_summary(report: &BatchReport) {
    match report.date {
        Some(date) => println!("Batch for {date}:"),
        None => println!("Batch (undated):"),
    }
    for run in &report.runs {
        let line = match &run.outcome {
            StepOutcome::Success { rows } => format!("ok      {rows} rows"),
            StepOutcome::Failure { kind, message } => format!("FAILED  {kind}: {message}"),
        };
        println!("  {:24} {line}  (audit {})", run.pipeline_id.as_str(), run.audit_id);
        if let Some(err) = &run.audit_error {
            println!("  {:24} audit write failed: {err}", "");
        }
    }
    match &report.transform {
        Some(StepOutcome::Success { rows }) => println!("  {:24} ok      {rows} rows", "transform"),
        Some(StepOutcome::Failure { message, .. }) => {
            println!("  {:24} FAILED  {message}", "transform");
        }
        None => println!("  {:24} skipped", "transform"),
    }
    println!(
        "  Total: {}  Succeeded: {}  Failed: {}  Notification: {}",
        report.total(),
        report.succeeded(),
        report.failed(),
        if report.notification_sent { "sent" } else { "not sent" }
    );
}
