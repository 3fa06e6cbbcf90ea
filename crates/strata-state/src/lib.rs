//! Pipeline configuration and audit persistence for Strata.
//!
//! Provides the [`ConfigProvider`], [`PipelineRegistry`] and [`AuditLedger`]
//! traits with [`SqliteStateStore`] and [`PostgresStateStore`] backends.
//! Both keep a `controller` table of pipeline definitions and an `audit`
//! table of execution history.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
pub mod postgres;
mod schema;
pub mod sqlite;

pub use backend::{AuditLedger, ConfigProvider, PipelineRegistry, StateStore};
pub use error::StateError;
pub use postgres::PostgresStateStore;
pub use sqlite::SqliteStateStore;

/// Common imports for typical usage.
pub mod prelude {
    pub use crate::backend::{AuditLedger, ConfigProvider, PipelineRegistry, StateStore};
    pub use crate::error::StateError;
    pub use crate::sqlite::SqliteStateStore;
    pub use strata_types::{AuditId, AuditStatus, PipelineId, RawPipelineRow};
}
