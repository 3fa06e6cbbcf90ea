//! Batch-scoped outcome aggregation and the consolidated end-of-run report.
//!
//! A [`NotificationBatch`] is created empty by the batch driver, lent by
//! `&mut` to every pipeline run, and flushed once at the end. The
//! [`FlushOnExit`] guard owns the batch so the flush also happens on early
//! return and unwind.

use std::ops::{Deref, DerefMut};
use std::panic::{catch_unwind, AssertUnwindSafe};

use chrono::{DateTime, Local};
use strata_types::{NotificationEvent, NotificationStatus, PipelineId};

use crate::notifier::Notifier;

const REPORT_TIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Ordered success and failure events for one batch.
#[derive(Debug, Clone)]
pub struct NotificationBatch {
    successes: Vec<NotificationEvent>,
    failures: Vec<NotificationEvent>,
    execution_count: usize,
    last_updated: DateTime<Local>,
}

impl Default for NotificationBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationBatch {
    #[must_use]
    pub fn new() -> Self {
        Self {
            successes: Vec::new(),
            failures: Vec::new(),
            execution_count: 0,
            last_updated: Local::now(),
        }
    }

    /// Append one outcome event. `error` is kept only for failures.
    pub fn record_outcome(
        &mut self,
        pipeline_id: &PipelineId,
        status: NotificationStatus,
        message: Option<&str>,
        records: Option<u64>,
        error: Option<&str>,
    ) {
        let now = Local::now();
        let event = NotificationEvent {
            pipeline_id: pipeline_id.clone(),
            status,
            message: message.map(str::to_string),
            records,
            error: error
                .filter(|_| status == NotificationStatus::Failure)
                .map(str::to_string),
            timestamp: now,
        };
        match status {
            NotificationStatus::Success => self.successes.push(event),
            NotificationStatus::Failure => self.failures.push(event),
        }
        self.execution_count += 1;
        self.last_updated = now;
        tracing::debug!(pipeline = %pipeline_id, %status, "Recorded pipeline outcome");
    }

    #[must_use]
    pub fn execution_count(&self) -> usize {
        self.execution_count
    }

    #[must_use]
    pub fn successes(&self) -> &[NotificationEvent] {
        &self.successes
    }

    #[must_use]
    pub fn failures(&self) -> &[NotificationEvent] {
        &self.failures
    }

    /// Report subject line.
    #[must_use]
    pub fn subject(&self) -> String {
        if self.failures.is_empty() {
            format!(
                "ETL Pipeline Report: All {} pipelines successful",
                self.successes.len() + self.failures.len()
            )
        } else {
            format!(
                "ETL Pipeline Report: {} failures, {} successes",
                self.failures.len(),
                self.successes.len()
            )
        }
    }

    /// Report body.
    #[must_use]
    pub fn body(&self) -> String {
        let mut lines = vec![
            "ETL Pipeline Execution Summary".to_string(),
            "================================".to_string(),
            format!(
                "Execution time: {}",
                self.last_updated.format(REPORT_TIME_FMT)
            ),
            format!(
                "Total executions: {}",
                self.successes.len() + self.failures.len()
            ),
            format!("Successful: {}", self.successes.len()),
            format!("Failed: {}", self.failures.len()),
            String::new(),
        ];

        if !self.successes.is_empty() {
            lines.push("SUCCESSFUL PIPELINES".to_string());
            lines.push("===================".to_string());
            for event in &self.successes {
                let records = match event.records {
                    Some(n) if n > 0 => n.to_string(),
                    _ => "N/A".to_string(),
                };
                lines.push(format!("- {}: {records} records", event.pipeline_id));
                if let Some(message) = event.message.as_deref().filter(|m| !m.is_empty()) {
                    lines.push(format!("  Message: {message}"));
                }
            }
            lines.push(String::new());
        }

        if !self.failures.is_empty() {
            lines.push("FAILED PIPELINES".to_string());
            lines.push("===============".to_string());
            for event in &self.failures {
                lines.push(format!("- {}", event.pipeline_id));
                if let Some(error) = event.error.as_deref().filter(|e| !e.is_empty()) {
                    lines.push(format!("  Error: {error}"));
                }
            }
            lines.push(String::new());
        }

        lines.join("\n")
    }

    /// Deliver the consolidated report.
    ///
    /// Returns `false` without contacting `notifier` when nothing was
    /// recorded. On delivery failure the events are kept for a later
    /// attempt.
    pub fn flush(&mut self, notifier: &dyn Notifier) -> bool {
        if self.execution_count == 0 {
            tracing::info!("No pending notifications to send");
            return false;
        }

        let subject = self.subject();
        match notifier.send(&subject, &self.body()) {
            Ok(()) => {
                tracing::info!(subject = %subject, "Notification sent");
                self.successes.clear();
                self.failures.clear();
                self.execution_count = 0;
                true
            }
            Err(e) => {
                tracing::error!(error = %format!("{e:#}"), "Failed to send notification");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Scope guard
// ---------------------------------------------------------------------------

/// Owns a [`NotificationBatch`] and flushes it exactly once: through
/// [`finish`](Self::finish), or on drop if the scope is left any other way.
pub struct FlushOnExit<'a> {
    batch: NotificationBatch,
    notifier: &'a dyn Notifier,
    delivered: Option<bool>,
}

impl<'a> FlushOnExit<'a> {
    #[must_use]
    pub fn new(notifier: &'a dyn Notifier) -> Self {
        Self {
            batch: NotificationBatch::new(),
            notifier,
            delivered: None,
        }
    }

    /// Flush now and return whether the report was delivered.
    pub fn finish(mut self) -> bool {
        self.flush_once()
    }

    fn flush_once(&mut self) -> bool {
        if let Some(delivered) = self.delivered {
            return delivered;
        }
        let notifier = self.notifier;
        let batch = &mut self.batch;
        let delivered = catch_unwind(AssertUnwindSafe(|| batch.flush(notifier))).unwrap_or_else(
            |_| {
                tracing::error!("Notifier panicked while sending the report");
                false
            },
        );
        self.delivered = Some(delivered);
        delivered
    }
}

impl Deref for FlushOnExit<'_> {
    type Target = NotificationBatch;

    fn deref(&self) -> &Self::Target {
        &self.batch
    }
}

impl DerefMut for FlushOnExit<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.batch
    }
}

impl Drop for FlushOnExit<'_> {
    fn drop(&mut self) {
        if self.delivered.is_none() {
            tracing::warn!(
                pending = self.batch.execution_count(),
                "Batch exited early, flushing notifications"
            );
            self.flush_once();
        }
    }
}
