//! Collaborator construction from the run configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use strata_state::{
    AuditLedger, ConfigProvider, PostgresStateStore, SqliteStateStore, StateStore,
};

use crate::config::types::{NotifyChannel, RunConfig, StateBackendKind};
use crate::extract::{Extractor, StagingExtractor};
use crate::notifier::{LogNotifier, Notifier, WebhookNotifier};
use crate::transform::{DbtTransformer, Transformer};

const DEFAULT_SQLITE_PATH: &str = "strata.db";
const DEFAULT_POSTGRES_CONNSTR: &str = "host=localhost dbname=strata";

/// One state store shared through each contract the engine consumes.
#[derive(Clone)]
pub struct StateHandles {
    pub store: Arc<dyn StateStore>,
    pub provider: Arc<dyn ConfigProvider>,
    pub ledger: Arc<dyn AuditLedger>,
}

impl StateHandles {
    pub fn from_store<S: StateStore + 'static>(store: S) -> Self {
        let store = Arc::new(store);
        Self {
            provider: store.clone(),
            ledger: store.clone(),
            store,
        }
    }
}

/// Everything the orchestrator and batch driver call out to.
#[derive(Clone)]
pub struct Collaborators {
    pub provider: Arc<dyn ConfigProvider>,
    pub ledger: Arc<dyn AuditLedger>,
    pub extractor: Arc<dyn Extractor>,
    pub transformer: Arc<dyn Transformer>,
    pub notifier: Arc<dyn Notifier>,
    /// Root of the source tree handed to the extractor.
    pub source_bucket: PathBuf,
}

/// Open the configured state store, creating its tables if needed.
///
/// # Errors
///
/// Returns an error if the store cannot be opened.
pub fn create_state_store(config: &RunConfig) -> Result<StateHandles> {
    match config.state.backend {
        StateBackendKind::Sqlite => {
            let path = config
                .state
                .connection
                .as_deref()
                .unwrap_or(DEFAULT_SQLITE_PATH);
            let store =
                SqliteStateStore::open(Path::new(path)).context("Failed to open state DB")?;
            tracing::debug!(path, "Opened SQLite state store");
            Ok(StateHandles::from_store(store))
        }
        StateBackendKind::Postgres => {
            let connstr = config
                .state
                .connection
                .as_deref()
                .unwrap_or(DEFAULT_POSTGRES_CONNSTR);
            let store = PostgresStateStore::open(connstr)
                .map_err(|e| anyhow::anyhow!("failed to open Postgres state store: {e}"))?;
            Ok(StateHandles::from_store(store))
        }
    }
}

/// Build the configured notifier.
///
/// # Errors
///
/// Returns an error if the webhook URL is missing or the HTTP client
/// cannot be built.
pub fn create_notifier(config: &RunConfig) -> Result<Arc<dyn Notifier>> {
    match config.notify.channel {
        NotifyChannel::Log => Ok(Arc::new(LogNotifier)),
        NotifyChannel::Webhook => {
            let url = config
                .notify
                .url
                .as_deref()
                .context("webhook notify channel requires a url")?;
            let notifier =
                WebhookNotifier::new(url, Duration::from_secs(config.notify.timeout_seconds))?;
            Ok(Arc::new(notifier))
        }
    }
}

/// Wire every collaborator for a batch run.
///
/// # Errors
///
/// Returns an error if the state store, staging store, or notifier cannot
/// be created.
pub fn build_collaborators(config: &RunConfig) -> Result<Collaborators> {
    let state = create_state_store(config)?;
    let extractor = StagingExtractor::open(&config.staging.path)?;
    let transformer = DbtTransformer::new(config.transform.clone());
    let notifier = create_notifier(config)?;

    Ok(Collaborators {
        provider: state.provider,
        ledger: state.ledger,
        extractor: Arc::new(extractor),
        transformer: Arc::new(transformer),
        notifier,
        source_bucket: config.source.bucket.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_config_str;
    use strata_types::{AuditStatus, PipelineId};
    use tempfile::tempdir;

    fn config_yaml(dir: &Path, notify: &str) -> String {
        format!(
            r#"
version: "1.0"
state:
  backend: sqlite
  connection: {state}
source:
  bucket: {bucket}
staging:
  path: {staging}
transform:
  project_dir: {project}
notify:
{notify}
"#,
            state = dir.join("meta/state.db").display(),
            bucket = dir.join("landing").display(),
            staging = dir.join("staging/staging.db").display(),
            project = dir.join("dbt_project").display(),
        )
    }

    #[test]
    fn test_create_state_store_custom_path() {
        let dir = tempdir().unwrap();
        let config = parse_config_str(&config_yaml(dir.path(), "  channel: log")).unwrap();

        let state = create_state_store(&config).unwrap();
        let audit_id = state.ledger.open(&PipelineId::new("test")).unwrap();
        let record = state.ledger.get(audit_id).unwrap().unwrap();
        assert_eq!(record.status, AuditStatus::Running);
        assert!(dir.path().join("meta/state.db").exists());
    }

    #[test]
    fn test_build_collaborators() {
        let dir = tempdir().unwrap();
        let config = parse_config_str(&config_yaml(dir.path(), "  channel: log")).unwrap();

        let collaborators = build_collaborators(&config).unwrap();
        assert_eq!(collaborators.source_bucket, dir.path().join("landing"));
        assert!(collaborators.provider.active_pipelines(None).unwrap().is_empty());
        assert!(dir.path().join("staging/staging.db").exists());
    }

    #[test]
    fn test_webhook_without_url_fails() {
        let dir = tempdir().unwrap();
        let config = parse_config_str(&config_yaml(dir.path(), "  channel: webhook")).unwrap();
        let err = create_notifier(&config).err().unwrap().to_string();
        assert!(err.contains("requires a url"), "got: {err}");
    }

    #[test]
    fn test_create_state_store_unwritable_path_fails() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, "").unwrap();
        let mut config = parse_config_str(&config_yaml(dir.path(), "  channel: log")).unwrap();
        config.state.connection = Some(blocker.join("state.db").display().to_string());
        let err = create_state_store(&config).err().unwrap();
        assert!(format!("{err:#}").contains("Failed to open state DB"), "got: {err:#}");
    }
}
