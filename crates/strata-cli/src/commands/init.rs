use std::path::Path;

use anyhow::Result;
use strata_engine::resolve::create_state_store;

/// Execute the `init` command: create the metadata tables.
pub async fn execute(config_path: &Path) -> Result<()> {
    let config = super::load_config(config_path)?;
    let backend = config.state.backend;
    super::blocking(move || create_state_store(&config).map(drop)).await?;
    println!("Metadata tables ready ({backend:?} backend).");
    Ok(())
}
