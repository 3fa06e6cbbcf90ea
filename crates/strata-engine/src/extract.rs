//! Extraction: land newline-delimited JSON files into the staging store.
//!
//! The source "bucket" is a directory tree laid out like the object store
//! (`<date>/<data_source>/*.jsonl`). Each JSON object becomes one row of the
//! staging table named after the pipeline's `source_table`.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::Connection;
use strata_types::{FailureKind, LoadType, RunDate, StepOutcome};

/// Extension of the data files picked up under a prefix.
const DATA_FILE_EXTENSION: &str = "jsonl";

/// Location of one pipeline's source data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub bucket: PathBuf,
    /// Relative prefix, always ending in `/`.
    pub prefix: String,
}

impl SourceRef {
    /// `<date>/<data_source>/` when a run date is given, `<data_source>/` otherwise.
    #[must_use]
    pub fn new(bucket: &Path, date: Option<RunDate>, data_source: &str) -> Self {
        let prefix = match date {
            Some(date) => format!("{}/{data_source}/", date.prefix()),
            None => format!("{data_source}/"),
        };
        Self {
            bucket: bucket.to_path_buf(),
            prefix,
        }
    }

    /// Directory holding the data files.
    #[must_use]
    pub fn dir(&self) -> PathBuf {
        self.bucket.join(self.prefix.trim_end_matches('/'))
    }
}

impl std::fmt::Display for SourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bucket.display(), self.prefix)
    }
}

/// Moves one pipeline's data from its source into a staging relation.
///
/// Implementations report failure through [`StepOutcome`] and never panic
/// on bad input.
pub trait Extractor: Send + Sync {
    fn load(&self, source: &SourceRef, destination_table: &str, load_type: LoadType)
        -> StepOutcome;
}

#[derive(Debug, thiserror::Error)]
enum ExtractError {
    #[error("No data files found in {0}")]
    NoFiles(String),
    #[error("No data in files at {0}")]
    NoRows(String),
    #[error("Error importing data from '{location}' to '{table}': {message}")]
    Transfer {
        location: String,
        table: String,
        message: String,
    },
}

struct StagedRow {
    json: String,
    file: String,
}

// ---------------------------------------------------------------------------
// SQLite staging extractor
// ---------------------------------------------------------------------------

/// Extractor writing into a `SQLite` staging database.
pub struct StagingExtractor {
    conn: Mutex<Connection>,
}

impl StagingExtractor {
    /// Open or create the staging database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or database cannot be created.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create staging directory {}", parent.display())
                })?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open staging DB {}", path.display()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory staging store (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if `SQLite` cannot allocate the database.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory staging DB")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("staging connection lock poisoned"))
    }

    /// Current number of rows in a staging table.
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not exist.
    pub fn row_count(&self, table: &str) -> Result<u64> {
        let conn = self.lock_conn()?;
        let count: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
                [],
                |row| row.get(0),
            )
            .with_context(|| format!("Failed to count rows in '{table}'"))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    fn try_load(
        &self,
        source: &SourceRef,
        table: &str,
        load_type: LoadType,
    ) -> Result<u64, ExtractError> {
        let location = source.to_string();
        let transfer = |e: anyhow::Error| ExtractError::Transfer {
            location: location.clone(),
            table: table.to_string(),
            message: format!("{e:#}"),
        };

        let files = list_data_files(&source.dir()).map_err(transfer)?;
        if files.is_empty() {
            return Err(ExtractError::NoFiles(location.clone()));
        }

        tracing::info!(files = files.len(), source = %location, "Reading data files");
        let mut rows = Vec::new();
        for (index, file) in files.iter().enumerate() {
            let read = read_rows(file, &mut rows).map_err(transfer)?;
            tracing::info!(
                file = %file.display(),
                index = index + 1,
                total = files.len(),
                rows = read,
                "Read data file"
            );
        }
        if rows.is_empty() {
            return Err(ExtractError::NoRows(location.clone()));
        }

        self.write_rows(table, load_type, &rows).map_err(transfer)?;
        self.row_count(table).map_err(transfer)
    }

    fn write_rows(&self, table: &str, load_type: LoadType, rows: &[StagedRow]) -> Result<()> {
        let table_ident = quote_ident(table);
        let loaded_at = Utc::now().to_rfc3339();
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction().context("begin staging transaction")?;

        tx.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table_ident} (\
             row_json TEXT NOT NULL, source_file TEXT NOT NULL, loaded_at TEXT NOT NULL)"
        ))
        .context("create staging table")?;

        match load_type {
            LoadType::Full => {
                tracing::info!(table, "Full load: existing data will be replaced");
                tx.execute(&format!("DELETE FROM {table_ident}"), [])
                    .context("clear staging table")?;
            }
            LoadType::Incremental => {
                tracing::info!(table, "Incremental load: data will be appended");
            }
        }

        {
            let mut stmt = tx
                .prepare(&format!(
                    "INSERT INTO {table_ident} (row_json, source_file, loaded_at) VALUES (?1, ?2, ?3)"
                ))
                .context("prepare staging insert")?;
            for row in rows {
                stmt.execute(rusqlite::params![row.json, row.file, loaded_at])
                    .context("insert staging row")?;
            }
        }

        tx.commit().context("commit staging transaction")
    }
}

impl Extractor for StagingExtractor {
    fn load(
        &self,
        source: &SourceRef,
        destination_table: &str,
        load_type: LoadType,
    ) -> StepOutcome {
        tracing::info!(
            source = %source,
            table = destination_table,
            load_type = %load_type,
            "Starting data import"
        );
        match self.try_load(source, destination_table, load_type) {
            Ok(rows) => {
                tracing::info!(table = destination_table, rows, "Staging load complete");
                StepOutcome::success(rows)
            }
            Err(e) => {
                tracing::error!(table = destination_table, error = %e, "Staging load failed");
                StepOutcome::failure(FailureKind::Extraction, e.to_string())
            }
        }
    }
}

/// Data files under `dir` (recursively), sorted by path. A missing
/// directory has no files.
fn list_data_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if dir.is_dir() {
        collect_data_files(dir, &mut files)?;
    }
    files.sort();
    Ok(files)
}

fn collect_data_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            collect_data_files(&path, files)?;
        } else if path
            .extension()
            .is_some_and(|ext| ext == DATA_FILE_EXTENSION)
        {
            files.push(path);
        }
    }
    Ok(())
}

/// Append every non-blank line of `file` as a staged row. Each line must
/// be a JSON object.
fn read_rows(file: &Path, rows: &mut Vec<StagedRow>) -> Result<usize> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let before = rows.len();
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid JSON", file.display(), line_no + 1))?;
        if !value.is_object() {
            anyhow::bail!(
                "{}:{}: expected a JSON object",
                file.display(),
                line_no + 1
            );
        }
        rows.push(StagedRow {
            json: value.to_string(),
            file: file.display().to_string(),
        });
    }
    Ok(rows.len() - before)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
