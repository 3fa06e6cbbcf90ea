use std::path::Path;

use anyhow::Result;
use strata_engine::config::types::RunConfig;
use strata_engine::resolve::create_state_store;

/// Execute the `check` command: validate config, state store and pipelines.
pub async fn execute(config_path: &Path) -> Result<()> {
    let config = super::load_config(config_path)?;
    println!("Run config:        OK");
    super::blocking(move || check(&config)).await
}

fn check(config: &RunConfig) -> Result<()> {
    let state = match create_state_store(config) {
        Ok(state) => {
            println!("State store:       OK");
            state
        }
        Err(e) => {
            println!("State store:       FAILED");
            println!("  {e:#}");
            anyhow::bail!("One or more checks failed");
        }
    };

    let pipelines = state.provider.active_pipelines(None)?;
    println!("Active pipelines:  {}", pipelines.len());
    for p in &pipelines {
        println!(
            "  {:24} {} -> {}.{} ({})",
            p.id.as_str(),
            p.source_table,
            p.layer,
            p.destination_table,
            p.load_type
        );
    }

    let project_file = config.transform.project_dir.join("dbt_project.yml");
    if project_file.exists() {
        println!("dbt project:       OK");
    } else {
        println!("dbt project:       WARNING");
        println!("  {} not found", project_file.display());
    }

    if pipelines.is_empty() {
        anyhow::bail!("No active pipelines configured");
    }
    println!("\nAll checks passed.");
    Ok(())
}
