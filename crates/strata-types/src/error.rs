//! Validation errors for model types built from untyped input.

/// Errors produced while turning raw store rows or operator input into
/// validated model types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// `schema_name` is not one of the known layers.
    #[error("unknown layer '{0}', expected one of: public, bronze, silver, gold")]
    UnknownLayer(String),

    /// `load_type` is neither `full` nor `incremental`.
    #[error("unknown load type '{0}', expected 'full' or 'incremental'")]
    UnknownLoadType(String),

    #[error("unknown audit status '{0}'")]
    UnknownAuditStatus(String),

    /// A required field was empty.
    #[error("pipeline '{pipeline}': field '{field}' must not be empty")]
    EmptyField {
        pipeline: String,
        field: &'static str,
    },

    /// A table name that is not a plain SQL identifier.
    #[error("pipeline '{pipeline}': {field} '{value}' is not a valid identifier")]
    InvalidIdentifier {
        pipeline: String,
        field: &'static str,
        value: String,
    },

    /// `data_source` would escape its landing directory.
    #[error("pipeline '{pipeline}': data_source '{value}' must be a single path segment")]
    InvalidDataSource { pipeline: String, value: String },

    /// Run date does not match `YYYYMMDD`.
    #[error("date must be in format YYYYMMDD, got '{0}'")]
    InvalidDate(String),
}
