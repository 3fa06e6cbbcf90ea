//! `SQLite`-backed implementation of the state store.
//!
//! Uses a single `Mutex<Connection>` for thread safety.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension};
use strata_types::{
    AuditDetails, AuditId, AuditRecord, AuditStatus, PipelineConfig, PipelineId, RawPipelineRow,
};

use crate::backend::{ensure_terminal, AuditLedger, ConfigProvider, PipelineRegistry};
use crate::error::{self, StateError};
use crate::schema::{
    close_rejection, now_timestamp, rows_to_column, validate_rows, AuditRow, AUDIT_COLUMNS,
    CONTROLLER_COLUMNS,
};

/// Idempotent DDL for the metadata tables.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS controller (
    id TEXT PRIMARY KEY,
    data_source TEXT NOT NULL,
    source_table TEXT NOT NULL,
    destination_table TEXT NOT NULL,
    schema_name TEXT NOT NULL DEFAULT 'public',
    load_type TEXT NOT NULL DEFAULT 'full',
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS audit (
    audit_id INTEGER PRIMARY KEY AUTOINCREMENT,
    pipeline_id TEXT NOT NULL,
    status TEXT NOT NULL,
    start_time TEXT NOT NULL,
    end_time TEXT,
    records_processed INTEGER,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_audit_pipeline ON audit (pipeline_id, start_time);
";

/// `SQLite`-backed configuration and audit storage.
///
/// Create with [`SqliteStateStore::open`] for file-backed persistence
/// or [`SqliteStateStore::in_memory`] for tests.
pub struct SqliteStateStore {
    conn: Mutex<Connection>,
}

impl SqliteStateStore {
    /// Open or create a `SQLite` state database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created,
    /// or a backend error if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(StateError::backend)?;
        Self::init(conn)
    }

    /// Create an in-memory `SQLite` store (for testing).
    ///
    /// # Errors
    ///
    /// Returns a backend error if the in-memory database can't be initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory().map_err(StateError::backend)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> error::Result<Self> {
        conn.execute_batch(CREATE_TABLES)
            .map_err(|e| StateError::backend_context("create metadata tables", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

    fn read_audit(conn: &Connection, audit_id: AuditId) -> error::Result<Option<AuditRow>> {
        conn.query_row(
            &format!("SELECT {AUDIT_COLUMNS} FROM audit WHERE audit_id = ?1"),
            [audit_id.get()],
            |row| {
                Ok(AuditRow {
                    audit_id: row.get(0)?,
                    pipeline_id: row.get(1)?,
                    status: row.get(2)?,
                    start_time: row.get(3)?,
                    end_time: row.get(4)?,
                    records_processed: row.get(5)?,
                    error_message: row.get(6)?,
                })
            },
        )
        .optional()
        .map_err(|e| StateError::backend_context("read audit", e))
    }
}

impl ConfigProvider for SqliteStateStore {
    fn active_pipelines(&self, filter: Option<&PipelineId>) -> error::Result<Vec<PipelineConfig>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CONTROLLER_COLUMNS} FROM controller \
                 WHERE active = 1 AND (?1 IS NULL OR id = ?1) ORDER BY id"
            ))
            .map_err(|e| StateError::backend_context("active_pipelines: prepare", e))?;

        let rows = stmt
            .query_map([filter.map(PipelineId::as_str)], |row| {
                Ok(RawPipelineRow {
                    id: row.get(0)?,
                    data_source: row.get(1)?,
                    source_table: row.get(2)?,
                    destination_table: row.get(3)?,
                    schema_name: row.get(4)?,
                    load_type: row.get(5)?,
                    active: row.get(6)?,
                })
            })
            .and_then(|mapped| mapped.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| StateError::backend_context("active_pipelines: query", e))?;

        validate_rows(rows)
    }
}

impl PipelineRegistry for SqliteStateStore {
    fn upsert_pipeline(&self, row: &RawPipelineRow) -> error::Result<PipelineConfig> {
        let config = PipelineConfig::try_from(row.clone())?;
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO controller \
             (id, data_source, source_table, destination_table, schema_name, load_type, active) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(id) DO UPDATE SET \
             data_source = ?2, source_table = ?3, destination_table = ?4, \
             schema_name = ?5, load_type = ?6, active = ?7, updated_at = ?8",
            rusqlite::params![
                config.id.as_str(),
                config.data_source,
                config.source_table,
                config.destination_table,
                config.layer.as_str(),
                config.load_type.as_str(),
                config.active,
                now_timestamp(),
            ],
        )
        .map_err(|e| StateError::backend_context("upsert_pipeline", e))?;
        Ok(config)
    }

    fn set_active(&self, pipeline: &PipelineId, active: bool) -> error::Result<bool> {
        let conn = self.lock_conn()?;
        let changed = conn
            .execute(
                "UPDATE controller SET active = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![active, now_timestamp(), pipeline.as_str()],
            )
            .map_err(|e| StateError::backend_context("set_active", e))?;
        Ok(changed > 0)
    }
}

impl AuditLedger for SqliteStateStore {
    fn open(&self, pipeline: &PipelineId) -> error::Result<AuditId> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO audit (pipeline_id, status, start_time) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                pipeline.as_str(),
                AuditStatus::Running.as_str(),
                now_timestamp()
            ],
        )
        .map_err(|e| StateError::backend_context("open audit", e))?;
        Ok(AuditId::new(conn.last_insert_rowid()))
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

        let conn = self.lock_conn()?;
        let changed = conn
            .execute(
                "UPDATE audit SET status = ?1, end_time = ?2, records_processed = ?3, \
                 error_message = ?4 WHERE audit_id = ?5 AND status = ?6",
                rusqlite::params![
                    status.as_str(),
                    now_timestamp(),
                    rows_to_column(records_processed),
                    error_message,
                    audit_id.get(),
                    AuditStatus::Running.as_str(),
                ],
            )
            .map_err(|e| StateError::backend_context("close audit", e))?;

        let row = Self::read_audit(&conn, audit_id)?;
        if changed == 0 {
            return Err(close_rejection(audit_id, row.map(|r| r.status)));
        }
        row.ok_or(StateError::AuditNotFound(audit_id))?
            .into_record()
    }

    fn get(&self, audit_id: AuditId) -> error::Result<Option<AuditRecord>> {
        let conn = self.lock_conn()?;
        Self::read_audit(&conn, audit_id)?
            .map(AuditRow::into_record)
            .transpose()
    }

    fn details(&self, audit_id: AuditId) -> error::Result<Option<AuditDetails>> {
        let conn = self.lock_conn()?;
        let joined = conn
            .query_row(
                "SELECT a.audit_id, a.pipeline_id, a.status, a.start_time, a.end_time, \
                 a.records_processed, a.error_message, \
                 c.source_table, c.destination_table, c.load_type \
                 FROM audit a JOIN controller c ON a.pipeline_id = c.id \
                 WHERE a.audit_id = ?1",
                [audit_id.get()],
                |row| {
                    Ok((
                        AuditRow {
                            audit_id: row.get(0)?,
                            pipeline_id: row.get(1)?,
                            status: row.get(2)?,
                            start_time: row.get(3)?,
                            end_time: row.get(4)?,
                            records_processed: row.get(5)?,
                            error_message: row.get(6)?,
                        },
                        row.get::<_, String>(7)?,
                        row.get::<_, String>(8)?,
                        row.get::<_, String>(9)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| StateError::backend_context("audit details", e))?;

        joined
            .map(|(row, source, destination, load_type)| {
                row.into_details(source, destination, load_type)
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_types::{LoadType, PipelineLayer};

    fn pid(name: &str) -> PipelineId {
        PipelineId::new(name)
    }

    fn row(id: &str, schema: &str, active: bool) -> RawPipelineRow {
        RawPipelineRow {
            id: id.into(),
            data_source: id.into(),
            source_table: format!("raw_{id}"),
            destination_table: format!("dim_{id}"),
            schema_name: schema.into(),
            load_type: "full".into(),
            active,
        }
    }

    #[test]
    fn active_pipelines_skips_inactive_and_orders_by_id() {
        let store = SqliteStateStore::in_memory().unwrap();
        store.upsert_pipeline(&row("orders", "public", true)).unwrap();
        store.upsert_pipeline(&row("customers", "silver", true)).unwrap();
        store.upsert_pipeline(&row("legacy", "public", false)).unwrap();

        let configs = store.active_pipelines(None).unwrap();
        let ids: Vec<_> = configs.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["customers", "orders"]);
        assert_eq!(configs[0].layer, PipelineLayer::Silver);
    }

    #[test]
    fn active_pipelines_filter() {
        let store = SqliteStateStore::in_memory().unwrap();
        store.upsert_pipeline(&row("orders", "public", true)).unwrap();
        store.upsert_pipeline(&row("customers", "public", true)).unwrap();

        let configs = store.active_pipelines(Some(&pid("orders"))).unwrap();
        assert_eq!(configs.len(), 1);
        assert!(store.active_pipelines(Some(&pid("nope"))).unwrap().is_empty());
    }

    #[test]
    fn upsert_updates_existing_row() {
        let store = SqliteStateStore::in_memory().unwrap();
        store.upsert_pipeline(&row("orders", "public", true)).unwrap();
        let mut changed = row("orders", "gold", true);
        changed.load_type = "incremental".into();
        store.upsert_pipeline(&changed).unwrap();

        let configs = store.active_pipelines(None).unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].layer, PipelineLayer::Gold);
        assert_eq!(configs[0].load_type, LoadType::Incremental);
    }

    #[test]
    fn upsert_rejects_invalid_row_without_writing() {
        let store = SqliteStateStore::in_memory().unwrap();
        let err = store
            .upsert_pipeline(&row("orders", "platinum", true))
            .unwrap_err();
        assert!(matches!(err, StateError::InvalidRow(_)));
        assert!(store.active_pipelines(None).unwrap().is_empty());
    }

    #[test]
    fn invalid_stored_row_fails_at_load_time() {
        let store = SqliteStateStore::in_memory().unwrap();
        store
            .lock_conn()
            .unwrap()
            .execute(
                "INSERT INTO controller (id, data_source, source_table, destination_table, load_type) \
                 VALUES ('bad', 'bad', 'raw_bad', 'dim_bad', 'merge')",
                [],
            )
            .unwrap();
        let err = store.active_pipelines(None).unwrap_err();
        assert!(err.to_string().contains("merge"), "got: {err}");
    }

    #[test]
    fn set_active_toggles() {
        let store = SqliteStateStore::in_memory().unwrap();
        store.upsert_pipeline(&row("orders", "public", true)).unwrap();
        assert!(store.set_active(&pid("orders"), false).unwrap());
        assert!(store.active_pipelines(None).unwrap().is_empty());
        assert!(!store.set_active(&pid("missing"), true).unwrap());
    }

    #[test]
    fn audit_lifecycle_completed() {
        let store = SqliteStateStore::in_memory().unwrap();
        let audit_id = store.open(&pid("orders")).unwrap();

        let running = store.get(audit_id).unwrap().unwrap();
        assert_eq!(running.status, AuditStatus::Running);
        assert!(running.end_time.is_none());
        assert!(running.records_processed.is_none());

        let closed = store
            .close(audit_id, AuditStatus::Completed, Some(120), Some("ignored"))
            .unwrap();
        assert_eq!(closed.status, AuditStatus::Completed);
        assert_eq!(closed.records_processed, Some(120));
        assert!(closed.end_time.is_some());
        assert!(closed.error_message.is_none());
    }

    #[test]
    fn audit_lifecycle_failed_keeps_error() {
        let store = SqliteStateStore::in_memory().unwrap();
        let audit_id = store.open(&pid("customers")).unwrap();
        let closed = store
            .close(audit_id, AuditStatus::Failed, Some(0), Some("No data files found"))
            .unwrap();
        assert_eq!(closed.error_message.as_deref(), Some("No data files found"));
    }

    #[test]
    fn closed_record_is_never_reopened() {
        let store = SqliteStateStore::in_memory().unwrap();
        let audit_id = store.open(&pid("orders")).unwrap();
        store
            .close(audit_id, AuditStatus::Failed, None, Some("boom"))
            .unwrap();

        let err = store
            .close(audit_id, AuditStatus::Completed, Some(5), None)
            .unwrap_err();
        assert!(matches!(
            err,
            StateError::AuditAlreadyClosed {
                status: AuditStatus::Failed,
                ..
            }
        ));
        let record = store.get(audit_id).unwrap().unwrap();
        assert_eq!(record.status, AuditStatus::Failed);
    }

    #[test]
    fn close_unknown_audit_id() {
        let store = SqliteStateStore::in_memory().unwrap();
        let err = store
            .close(AuditId::new(999), AuditStatus::Completed, None, None)
            .unwrap_err();
        assert!(matches!(err, StateError::AuditNotFound(_)));
    }

    #[test]
    fn multiple_opens_get_distinct_ids() {
        let store = SqliteStateStore::in_memory().unwrap();
        let a = store.open(&pid("p")).unwrap();
        let b = store.open(&pid("p")).unwrap();
        assert!(b > a);
    }

    #[test]
    fn details_join_controller_row() {
        let store = SqliteStateStore::in_memory().unwrap();
        store.upsert_pipeline(&row("orders", "public", true)).unwrap();
        let audit_id = store.open(&pid("orders")).unwrap();

        let details = store.details(audit_id).unwrap().unwrap();
        assert_eq!(details.source_table, "raw_orders");
        assert_eq!(details.destination_table, "dim_orders");
        assert_eq!(details.load_type, "full");
        assert!(store.details(AuditId::new(404)).unwrap().is_none());
    }

    #[test]
    fn open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");
        let store = SqliteStateStore::open(&path).unwrap();
        store.open(&pid("p")).unwrap();
        assert!(path.exists());
    }
}
