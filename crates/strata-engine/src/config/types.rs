//! Run configuration types, deserialized from `strata.yaml`.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level run configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub version: String,
    #[serde(default)]
    pub state: StateConfig,
    pub source: SourceConfig,
    pub staging: StagingConfig,
    pub transform: TransformConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

// ---------------------------------------------------------------------------
// State store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackendKind {
    #[default]
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StateConfig {
    #[serde(default)]
    pub backend: StateBackendKind,
    /// File path (sqlite) or libpq connection string (postgres).
    #[serde(default)]
    pub connection: Option<String>,
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Root directory laid out as `<date>/<data_source>/*.jsonl`.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub bucket: PathBuf,
}

/// Local staging store that receives extracted rows.
#[derive(Debug, Clone, Deserialize)]
pub struct StagingConfig {
    pub path: PathBuf,
}

// ---------------------------------------------------------------------------
// Transformation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct TransformConfig {
    #[serde(default = "default_executable")]
    pub executable: String,
    pub project_dir: PathBuf,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub profiles_dir: Option<PathBuf>,
}

fn default_executable() -> String {
    "dbt".to_string()
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyChannel {
    #[default]
    Log,
    Webhook,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub channel: NotifyChannel,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            channel: NotifyChannel::default(),
            url: None,
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

fn default_timeout_seconds() -> u64 {
    10
}
