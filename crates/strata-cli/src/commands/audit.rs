use std::path::Path;

use anyhow::Result;
use strata_engine::resolve::create_state_store;
use strata_types::AuditId;

/// Execute the `audit` command: print one audit record.
pub async fn execute(config_path: &Path, audit_id: i64) -> Result<()> {
    let config = super::load_config(config_path)?;
    let details = super::blocking(move || {
        let state = create_state_store(&config)?;
        Ok(state.ledger.details(AuditId::new(audit_id))?)
    })
    .await?;

    let Some(details) = details else {
        anyhow::bail!("Audit record {audit_id} not found");
    };
    let record = &details.record;

    println!("Audit {}", record.audit_id);
    println!("  Pipeline:     {}", record.pipeline_id.as_str());
    println!("  Source:       {}", details.source_table);
    println!("  Destination:  {}", details.destination_table);
    println!("  Load type:    {}", details.load_type);
    println!("  Status:       {}", record.status);
    println!("  Started:      {}", record.start_time);
    if let Some(end) = record.end_time {
        println!("  Finished:     {end}");
    }
    if let Some(rows) = record.records_processed {
        println!("  Records:      {rows}");
    }
    if let Some(err) = &record.error_message {
        println!("  Error:        {err}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::sqlite_config;

    #[tokio::test]
    async fn unknown_audit_id_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = execute(&sqlite_config(dir.path()), 42).await.unwrap_err();
        assert_eq!(err.to_string(), "Audit record 42 not found");
    }
}
