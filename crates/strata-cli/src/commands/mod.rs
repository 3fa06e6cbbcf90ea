pub mod audit;
pub mod check;
pub mod init;
pub mod register;
pub mod run;

use std::path::Path;

use anyhow::{Context, Result};
use strata_engine::config::types::RunConfig;
use strata_engine::config::{parser, validator};

/// Parse and validate the run config file.
fn load_config(config_path: &Path) -> Result<RunConfig> {
    let config = parser::parse_config(config_path)
        .with_context(|| format!("Failed to parse config: {}", config_path.display()))?;
    validator::validate_config(&config)?;
    Ok(config)
}

/// Run a state store command on the blocking pool.
///
/// The sync Postgres client starts its own runtime, which tokio refuses
/// on a thread that is already driving async tasks.
async fn blocking<T, F>(command: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(command)
        .await
        .context("Command task panicked")?
}
