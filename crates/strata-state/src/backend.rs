//! Storage contracts for pipeline configuration and execution history.
//!
//! [`ConfigProvider`] and [`AuditLedger`] are what the orchestrator
//! consumes; [`PipelineRegistry`] is the administration path used by the
//! CLI to maintain controller rows. Model types live in [`strata_types`].

use strata_types::{
    AuditDetails, AuditId, AuditRecord, AuditStatus, PipelineConfig, PipelineId, RawPipelineRow,
};

use crate::error;

/// Read access to active pipeline definitions.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn ConfigProvider>`.
pub trait ConfigProvider: Send + Sync {
    /// Active pipelines ordered by id, optionally narrowed to one id.
    ///
    /// Inactive rows are never returned. Every row is validated into a
    /// [`PipelineConfig`]; a single invalid row fails the whole call.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) if the store is
    /// unreachable or a row fails validation.
    fn active_pipelines(&self, filter: Option<&PipelineId>) -> error::Result<Vec<PipelineConfig>>;
}

/// Write access to controller rows.
pub trait PipelineRegistry: Send + Sync {
    /// Insert or update the controller row with `row.id`.
    ///
    /// The row is validated before anything is written.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::InvalidRow`](crate::error::StateError::InvalidRow)
    /// for invalid input, or a backend error on storage failure.
    fn upsert_pipeline(&self, row: &RawPipelineRow) -> error::Result<PipelineConfig>;

    /// Toggle the `active` flag. Returns `false` if no such pipeline exists.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn set_active(&self, pipeline: &PipelineId, active: bool) -> error::Result<bool>;
}

/// Append-only execution history with a single terminal transition per record.
pub trait AuditLedger: Send + Sync {
    /// Create a `running` record stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn open(&self, pipeline: &PipelineId) -> error::Result<AuditId>;

    /// Move a `running` record to `status`, stamping its end time.
    ///
    /// # Errors
    ///
    /// - [`StateError::NonTerminalClose`](crate::error::StateError::NonTerminalClose) if `status` is `Running`.
    /// - [`StateError::AuditNotFound`](crate::error::StateError::AuditNotFound) for an unknown id.
    /// - [`StateError::AuditAlreadyClosed`](crate::error::StateError::AuditAlreadyClosed) if the record is terminal.
    fn close(
        &self,
        audit_id: AuditId,
        status: AuditStatus,
        records_processed: Option<u64>,
        error_message: Option<&str>,
    ) -> error::Result<AuditRecord>;

    /// Fetch one record by id.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn get(&self, audit_id: AuditId) -> error::Result<Option<AuditRecord>>;

    /// Fetch one record together with its controller row.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn details(&self, audit_id: AuditId) -> error::Result<Option<AuditDetails>>;
}

/// Combined store used by the CLI, which needs all three contracts from a
/// single connection.
pub trait StateStore: ConfigProvider + PipelineRegistry + AuditLedger {}

impl<T: ConfigProvider + PipelineRegistry + AuditLedger> StateStore for T {}

/// Reject a non-terminal status before touching storage.
pub(crate) fn ensure_terminal(audit_id: AuditId, status: AuditStatus) -> error::Result<()> {
    if status.is_terminal() {
        Ok(())
    } else {
        Err(error::StateError::NonTerminalClose(audit_id))
    }
}
