//! Pipeline and batch execution results.

use strata_types::{AuditId, PipelineId, RunDate, StepOutcome};

/// Result of driving one pipeline through its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRun {
    pub pipeline_id: PipelineId,
    pub audit_id: AuditId,
    pub outcome: StepOutcome,
    /// Set when the ledger rejected closing the audit record.
    pub audit_error: Option<String>,
}

impl PipelineRun {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

/// Result of one two-phase batch.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub date: Option<RunDate>,
    /// Phase 1 runs, in provider order.
    pub runs: Vec<PipelineRun>,
    /// Phase 2 outcome; `None` when the phase did not run.
    pub transform: Option<StepOutcome>,
    pub cancelled: bool,
    /// Whether the consolidated report was delivered.
    pub notification_sent: bool,
}

impl BatchReport {
    /// Successful executions, counting Phase 2 as one.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.runs.iter().filter(|r| r.is_success()).count()
            + usize::from(self.transform.as_ref().is_some_and(StepOutcome::is_success))
    }

    /// Failed executions, counting Phase 2 as one.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.runs.iter().filter(|r| !r.is_success()).count()
            + usize::from(self.transform.as_ref().is_some_and(|t| !t.is_success()))
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.succeeded() + self.failed()
    }

    #[must_use]
    pub fn audit_write_failures(&self) -> usize {
        self.runs.iter().filter(|r| r.audit_error.is_some()).count()
    }

    /// Nothing failed, every audit write landed, and the batch ran to the end.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.audit_write_failures() == 0 && !self.cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_types::FailureKind;

    fn run(name: &str, outcome: StepOutcome, audit_error: Option<&str>) -> PipelineRun {
        PipelineRun {
            pipeline_id: PipelineId::new(name),
            audit_id: AuditId::new(1),
            outcome,
            audit_error: audit_error.map(str::to_string),
        }
    }

    #[test]
    fn counts_include_transform_phase() {
        let report = BatchReport {
            runs: vec![
                run("orders", StepOutcome::success(120), None),
                run(
                    "customers",
                    StepOutcome::failure(FailureKind::Extraction, "No data files found"),
                    None,
                ),
            ],
            transform: Some(StepOutcome::success(0)),
            ..BatchReport::default()
        };
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.total(), 3);
        assert!(!report.is_success());
    }

    #[test]
    fn audit_write_failure_breaks_success() {
        let report = BatchReport {
            runs: vec![run("orders", StepOutcome::success(1), Some("db down"))],
            transform: Some(StepOutcome::success(0)),
            ..BatchReport::default()
        };
        assert_eq!(report.failed(), 0);
        assert_eq!(report.audit_write_failures(), 1);
        assert!(!report.is_success());
    }

    #[test]
    fn cancelled_batch_is_not_successful() {
        let report = BatchReport {
            cancelled: true,
            ..BatchReport::default()
        };
        assert_eq!(report.total(), 0);
        assert!(!report.is_success());
    }
}
