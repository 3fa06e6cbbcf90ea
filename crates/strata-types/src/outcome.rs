//! Typed results returned across collaborator boundaries.
//!
//! Extractors and transformers never raise; they report a
//! [`StepOutcome`] that the orchestrator folds into audit and
//! notification state.

use serde::{Deserialize, Serialize};

/// Classification of a failed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No source data found, or the transfer failed.
    Extraction,
    /// The transformation engine reported errors.
    Transformation,
    /// Anything else, including panics escaping a collaborator.
    Unexpected,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Extraction => "extraction",
            Self::Transformation => "transformation",
            Self::Unexpected => "unexpected",
        };
        f.write_str(s)
    }
}

/// Result of one lifecycle step (extract, transform) or of a whole pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Success { rows: u64 },
    Failure { kind: FailureKind, message: String },
}

impl StepOutcome {
    #[must_use]
    pub fn success(rows: u64) -> Self {
        Self::Success { rows }
    }

    #[must_use]
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Error text of a failed step.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { message, .. } => Some(message),
        }
    }
}
