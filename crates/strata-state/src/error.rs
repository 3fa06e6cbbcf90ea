//! State store error types.

use strata_types::{AuditId, AuditStatus, ConfigError};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by the configuration and audit store.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Underlying database failure.
    #[error("state backend error: {0}")]
    Backend(#[source] BoxError),

    /// Underlying database failure tagged with the operation that was running.
    #[error("{context}: state backend error: {source}")]
    BackendContext {
        context: &'static str,
        #[source]
        source: BoxError,
    },

    /// File-system I/O failure (e.g. creating the database directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal mutex was poisoned by a panicked thread.
    #[error("state backend lock poisoned")]
    LockPoisoned,

    /// A stored controller row failed validation.
    #[error("invalid controller row: {0}")]
    InvalidRow(#[from] ConfigError),

    /// No audit record with this id.
    #[error("audit record {0} not found")]
    AuditNotFound(AuditId),

    /// The record already reached a terminal state and cannot be closed again.
    #[error("audit record {audit_id} is already {status}")]
    AuditAlreadyClosed {
        audit_id: AuditId,
        status: AuditStatus,
    },

    /// Closing a record requires a terminal status.
    #[error("cannot close audit record {0} with non-terminal status 'running'")]
    NonTerminalClose(AuditId),
}

impl StateError {
    pub fn backend(err: impl Into<BoxError>) -> Self {
        Self::Backend(err.into())
    }

    pub fn backend_context(context: &'static str, err: impl Into<BoxError>) -> Self {
        Self::BackendContext {
            context,
            source: err.into(),
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StateError>;
