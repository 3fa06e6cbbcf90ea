use std::path::Path;

use anyhow::{Context, Result};
use strata_engine::resolve::create_state_store;
use strata_state::PipelineRegistry;
use strata_types::RawPipelineRow;

/// Execute the `register` command: upsert one controller entry.
pub async fn execute(config_path: &Path, row: RawPipelineRow) -> Result<()> {
    let config = super::load_config(config_path)?;
    let pipeline = super::blocking(move || {
        let state = create_state_store(&config)?;
        state
            .store
            .upsert_pipeline(&row)
            .with_context(|| format!("Failed to register pipeline '{}'", row.id))
    })
    .await?;

    println!(
        "Registered '{}': {} -> {}.{} ({}{})",
        pipeline.id.as_str(),
        pipeline.source_table,
        pipeline.layer,
        pipeline.destination_table,
        pipeline.load_type,
        if pipeline.active { "" } else { ", inactive" }
    );
    Ok(())
}
