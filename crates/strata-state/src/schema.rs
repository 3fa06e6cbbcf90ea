//! Row shapes and timestamp handling shared by the store backends.

use chrono::{NaiveDateTime, Utc};
use strata_types::{
    AuditDetails, AuditId, AuditRecord, AuditStatus, PipelineConfig, PipelineId, RawPipelineRow,
};

use crate::error::{self, StateError};

/// Storage datetime format (UTC, no timezone suffix).
pub(crate) const DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Column list shared by every audit query, in [`AuditRow`] field order.
pub(crate) const AUDIT_COLUMNS: &str =
    "audit_id, pipeline_id, status, start_time, end_time, records_processed, error_message";

/// Column list shared by every controller query, in [`RawPipelineRow`] field order.
pub(crate) const CONTROLLER_COLUMNS: &str =
    "id, data_source, source_table, destination_table, schema_name, load_type, active";

/// Current UTC time in storage format.
pub(crate) fn now_timestamp() -> String {
    Utc::now().format(DATETIME_FMT).to_string()
}

fn parse_timestamp(raw: &str) -> error::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, DATETIME_FMT)
        .map_err(|e| StateError::backend_context("parse audit timestamp", e))
}

/// Clamp a row count into the signed column type.
pub(crate) fn rows_to_column(rows: Option<u64>) -> Option<i64> {
    rows.map(|r| i64::try_from(r).unwrap_or(i64::MAX))
}

/// An `audit` row exactly as stored.
#[derive(Debug)]
pub(crate) struct AuditRow {
    pub audit_id: i64,
    pub pipeline_id: String,
    pub status: String,
    pub start_time: String,
    pub end_time: Option<String>,
    pub records_processed: Option<i64>,
    pub error_message: Option<String>,
}

impl AuditRow {
    pub(crate) fn into_record(self) -> error::Result<AuditRecord> {
        Ok(AuditRecord {
            audit_id: AuditId::new(self.audit_id),
            pipeline_id: PipelineId::new(self.pipeline_id),
            status: self.status.parse::<AuditStatus>()?,
            start_time: parse_timestamp(&self.start_time)?,
            end_time: self.end_time.as_deref().map(parse_timestamp).transpose()?,
            records_processed: self
                .records_processed
                .map(|r| u64::try_from(r).unwrap_or_default()),
            error_message: self.error_message,
        })
    }

    pub(crate) fn into_details(
        self,
        source_table: String,
        destination_table: String,
        load_type: String,
    ) -> error::Result<AuditDetails> {
        Ok(AuditDetails {
            record: self.into_record()?,
            source_table,
            destination_table,
            load_type,
        })
    }
}

/// Validate every raw controller row, failing on the first bad one.
pub(crate) fn validate_rows(rows: Vec<RawPipelineRow>) -> error::Result<Vec<PipelineConfig>> {
    rows.into_iter()
        .map(|row| PipelineConfig::try_from(row).map_err(StateError::from))
        .collect()
}

/// Error for a close that matched no `running` row, given the row's
/// current status (if the row exists at all).
pub(crate) fn close_rejection(audit_id: AuditId, current: Option<String>) -> StateError {
    match current.map(|s| s.parse::<AuditStatus>()) {
        None => StateError::AuditNotFound(audit_id),
        Some(Ok(status)) => StateError::AuditAlreadyClosed { audit_id, status },
        Some(Err(e)) => StateError::InvalidRow(e),
    }
}
