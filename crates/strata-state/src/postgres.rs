//! `PostgreSQL`-backed implementation of the state store.
//!
//! Uses the sync `postgres` crate with a single `Mutex<Client>` for
//! thread safety. The client drives its own internal tokio runtime, so it
//! must not be opened or called from a thread that is already driving an
//! async runtime; async callers go through `spawn_blocking`.

use std::sync::{Mutex, MutexGuard};

use postgres::{Client, NoTls, Row};
use strata_types::{
    AuditDetails, AuditId, AuditRecord, AuditStatus, PipelineConfig, PipelineId, RawPipelineRow,
};

use crate::backend::{ensure_terminal, AuditLedger, ConfigProvider, PipelineRegistry};
use crate::error::{self, StateError};
use crate::schema::{
    close_rejection, now_timestamp, rows_to_column, validate_rows, AuditRow, AUDIT_COLUMNS,
    CONTROLLER_COLUMNS,
};

/// Idempotent DDL for the metadata tables (`PostgreSQL` dialect).
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS controller (
    id TEXT PRIMARY KEY,
    data_source TEXT NOT NULL,
    source_table TEXT NOT NULL,
    destination_table TEXT NOT NULL,
    schema_name TEXT NOT NULL DEFAULT 'public',
    load_type TEXT NOT NULL DEFAULT 'full',
    active BOOLEAN NOT NULL DEFAULT TRUE,
    created_at TEXT NOT NULL DEFAULT (now()::text),
    updated_at TEXT NOT NULL DEFAULT (now()::text)
);

CREATE TABLE IF NOT EXISTS audit (
    audit_id BIGSERIAL PRIMARY KEY,
    pipeline_id TEXT NOT NULL,
    status TEXT NOT NULL,
    start_time TEXT NOT NULL,
    end_time TEXT,
    records_processed BIGINT,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_audit_pipeline ON audit (pipeline_id, start_time);
";

/// `PostgreSQL`-backed configuration and audit storage.
///
/// Create with [`PostgresStateStore::open`] providing a libpq-style
/// connection string (e.g. `"host=localhost dbname=strata user=postgres"`).
pub struct PostgresStateStore {
    client: Mutex<Client>,
}

impl PostgresStateStore {
    /// Connect to a `PostgreSQL` database and initialize the metadata tables.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Backend`] if connection or DDL execution fails.
    pub fn open(connstr: &str) -> error::Result<Self> {
        let mut client = Client::connect(connstr, NoTls).map_err(StateError::backend)?;
        client
            .batch_execute(CREATE_TABLES)
            .map_err(|e| StateError::backend_context("create metadata tables", e))?;
        Ok(Self {
            client: Mutex::new(client),
        })
    }

    /// Acquire the client lock.
    fn lock_client(&self) -> error::Result<MutexGuard<'_, Client>> {
        self.client.lock().map_err(|_| StateError::LockPoisoned)
    }

    fn audit_row(row: &Row) -> AuditRow {
        AuditRow {
            audit_id: row.get(0),
            pipeline_id: row.get(1),
            status: row.get(2),
            start_time: row.get(3),
            end_time: row.get(4),
            records_processed: row.get(5),
            error_message: row.get(6),
        }
    }

    fn read_audit(client: &mut Client, audit_id: AuditId) -> error::Result<Option<AuditRow>> {
        let row = client
            .query_opt(
                &format!("SELECT {AUDIT_COLUMNS} FROM audit WHERE audit_id = $1"),
                &[&audit_id.get()],
            )
            .map_err(|e| StateError::backend_context("read audit", e))?;
        Ok(row.as_ref().map(Self::audit_row))
    }
}

impl ConfigProvider for PostgresStateStore {
    fn active_pipelines(&self, filter: Option<&PipelineId>) -> error::Result<Vec<PipelineConfig>> {
        let mut client = self.lock_client()?;
        let filter = filter.map(PipelineId::as_str);
        let rows = client
            .query(
                &format!(
                    "SELECT {CONTROLLER_COLUMNS} FROM controller \
                     WHERE active AND ($1::text IS NULL OR id = $1) ORDER BY id"
                ),
                &[&filter],
            )
            .map_err(|e| StateError::backend_context("active_pipelines", e))?;

        let raw = rows
            .iter()
            .map(|row| RawPipelineRow {
                id: row.get(0),
                data_source: row.get(1),
                source_table: row.get(2),
                destination_table: row.get(3),
                schema_name: row.get(4),
                load_type: row.get(5),
                active: row.get(6),
            })
            .collect();
        validate_rows(raw)
    }
}

impl PipelineRegistry for PostgresStateStore {
    fn upsert_pipeline(&self, row: &RawPipelineRow) -> error::Result<PipelineConfig> {
        let config = PipelineConfig::try_from(row.clone())?;
        let mut client = self.lock_client()?;
        client
            .execute(
                "INSERT INTO controller \
                 (id, data_source, source_table, destination_table, schema_name, load_type, active) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7) \
                 ON CONFLICT (id) DO UPDATE SET \
                 data_source = $2, source_table = $3, destination_table = $4, \
                 schema_name = $5, load_type = $6, active = $7, updated_at = $8",
                &[
                    &config.id.as_str(),
                    &config.data_source,
                    &config.source_table,
                    &config.destination_table,
                    &config.layer.as_str(),
                    &config.load_type.as_str(),
                    &config.active,
                    &now_timestamp(),
                ],
            )
            .map_err(|e| StateError::backend_context("upsert_pipeline", e))?;
        Ok(config)
    }

    fn set_active(&self, pipeline: &PipelineId, active: bool) -> error::Result<bool> {
        let mut client = self.lock_client()?;
        let changed = client
            .execute(
                "UPDATE controller SET active = $1, updated_at = $2 WHERE id = $3",
                &[&active, &now_timestamp(), &pipeline.as_str()],
            )
            .map_err(|e| StateError::backend_context("set_active", e))?;
        Ok(changed > 0)
    }
}

impl AuditLedger for PostgresStateStore {
    fn open(&self, pipeline: &PipelineId) -> error::Result<AuditId> {
        let mut client = self.lock_client()?;
        let row = client
            .query_one(
                "INSERT INTO audit (pipeline_id, status, start_time) \
                 VALUES ($1, $2, $3) RETURNING audit_id",
                &[
                    &pipeline.as_str(),
                    &AuditStatus::Running.as_str(),
                    &now_timestamp(),
                ],
            )
            .map_err(|e| StateError::backend_context("open audit", e))?;
        Ok(AuditId::new(row.get(0)))
    }

    fn close(
        &self,
        audit_id: AuditId,
        status: AuditStatus,
        records_processed: Option<u64>,
        error_message: Option<&str>,
    ) -> error::Result<AuditRecord> {
        ensure_terminal(audit_id, status)?;
        let error_message = error_message.filter(|_| status == AuditStatus::Failed);

        let mut client = self.lock_client()?;
        let updated = client
            .query_opt(
                &format!(
                    "UPDATE audit SET status = $1, end_time = $2, records_processed = $3, \
                     error_message = $4 WHERE audit_id = $5 AND status = $6 \
                     RETURNING {AUDIT_COLUMNS}"
                ),
                &[
                    &status.as_str(),
                    &now_timestamp(),
                    &rows_to_column(records_processed),
                    &error_message,
                    &audit_id.get(),
                    &AuditStatus::Running.as_str(),
                ],
            )
            .map_err(|e| StateError::backend_context("close audit", e))?;

        match updated {
            Some(row) => Self::audit_row(&row).into_record(),
            None => {
                let current = Self::read_audit(&mut client, audit_id)?;
                Err(close_rejection(audit_id, current.map(|r| r.status)))
            }
        }
    }

    fn get(&self, audit_id: AuditId) -> error::Result<Option<AuditRecord>> {
        let mut client = self.lock_client()?;
        Self::read_audit(&mut client, audit_id)?
            .map(AuditRow::into_record)
            .transpose()
    }

    fn details(&self, audit_id: AuditId) -> error::Result<Option<AuditDetails>> {
        let mut client = self.lock_client()?;
        let row = client
            .query_opt(
                "SELECT a.audit_id, a.pipeline_id, a.status, a.start_time, a.end_time, \
                 a.records_processed, a.error_message, \
                 c.source_table, c.destination_table, c.load_type \
                 FROM audit a JOIN controller c ON a.pipeline_id = c.id \
                 WHERE a.audit_id = $1",
                &[&audit_id.get()],
            )
            .map_err(|e| StateError::backend_context("audit details", e))?;

        row.map(|row| {
            Self::audit_row(&row).into_details(row.get(7), row.get(8), row.get(9))
        })
        .transpose()
    }
}
