//! Semantic validation for parsed run configuration values.

use anyhow::{bail, Result};

use crate::config::types::{NotifyChannel, RunConfig, StateBackendKind};

/// Validate a parsed run configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the config.
pub fn validate_config(config: &RunConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported config version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.state.backend == StateBackendKind::Postgres
        && config
            .state
            .connection
            .as_deref()
            .is_some_and(|c| c.trim().is_empty())
    {
        errors.push("Postgres state connection must not be empty".to_string());
    }

    if config.source.bucket.as_os_str().is_empty() {
        errors.push("Source bucket must not be empty".to_string());
    }

    if config.staging.path.as_os_str().is_empty() {
        errors.push("Staging path must not be empty".to_string());
    }

    if config.transform.executable.trim().is_empty() {
        errors.push("Transform executable must not be empty".to_string());
    }

    if config.transform.project_dir.as_os_str().is_empty() {
        errors.push("Transform project_dir must not be empty".to_string());
    }

    if config.notify.channel == NotifyChannel::Webhook {
        match config.notify.url.as_deref().map(str::trim) {
            None | Some("") => errors.push("Webhook notify channel requires a url".to_string()),
            Some(url) if !is_http_url(url) => {
                errors.push(format!("Webhook url '{url}' must start with http:// or https://"));
            }
            Some(_) => {}
        }
    }

    if config.notify.timeout_seconds == 0 {
        errors.push("notify timeout_seconds must be > 0".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Config validation failed:\n  - {}", errors.join("\n  - "));
    }
}

fn is_http_url(url: &str) -> bool {
    url.strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .is_some_and(|rest| !rest.is_empty())
}
