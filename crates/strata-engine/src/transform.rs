//! Transformation: run dbt models as a subprocess and fold the run
//! artifacts into a [`StepOutcome`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use strata_types::{FailureKind, LoadType, PipelineConfig, StepOutcome};

use crate::config::types::TransformConfig;

/// One transformer invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformRequest {
    /// Model selector; `None` runs every model in the project.
    pub selector: Option<String>,
    pub full_refresh: bool,
    pub vars: BTreeMap<String, String>,
}

impl TransformRequest {
    /// Request for a single pipeline's destination model.
    #[must_use]
    pub fn for_pipeline(config: &PipelineConfig, today: NaiveDate) -> Self {
        let vars = BTreeMap::from([
            ("source_table".to_string(), config.source_table.clone()),
            ("date".to_string(), today.format("%Y-%m-%d").to_string()),
        ]);
        Self {
            selector: Some(config.model_selector()),
            full_refresh: config.load_type == LoadType::Full,
            vars,
        }
    }

    /// Request covering every model, used by the batch transform phase.
    #[must_use]
    pub fn all_models(full_refresh: bool) -> Self {
        Self {
            selector: None,
            full_refresh,
            vars: BTreeMap::new(),
        }
    }
}

/// Runs the transformation step for one or more destination tables.
pub trait Transformer: Send + Sync {
    fn run(&self, request: &TransformRequest) -> StepOutcome;
}

// ---------------------------------------------------------------------------
// dbt
// ---------------------------------------------------------------------------

/// Subset of dbt's `target/run_results.json`.
#[derive(Debug, Deserialize)]
struct RunResults {
    #[serde(default)]
    results: Vec<ModelResult>,
}

#[derive(Debug, Deserialize)]
struct ModelResult {
    status: String,
    #[serde(default)]
    adapter_response: AdapterResponse,
}

#[derive(Debug, Default, Deserialize)]
struct AdapterResponse {
    #[serde(default)]
    rows_affected: Option<i64>,
}

/// Transformer shelling out to the dbt CLI.
pub struct DbtTransformer {
    config: TransformConfig,
}

impl DbtTransformer {
    #[must_use]
    pub fn new(config: TransformConfig) -> Self {
        Self { config }
    }

    /// Full argument list for `request`, excluding the executable.
    fn args(&self, request: &TransformRequest) -> Result<Vec<String>> {
        let mut args = vec![
            "run".to_string(),
            "--project-dir".to_string(),
            self.config.project_dir.display().to_string(),
        ];
        if let Some(target) = &self.config.target {
            args.extend(["--target".to_string(), target.clone()]);
        }
        if let Some(profiles_dir) = &self.config.profiles_dir {
            args.extend([
                "--profiles-dir".to_string(),
                profiles_dir.display().to_string(),
            ]);
        }
        if let Some(selector) = &request.selector {
            args.extend(["--select".to_string(), selector.clone()]);
        }
        if request.full_refresh {
            args.push("--full-refresh".to_string());
        }
        if !request.vars.is_empty() {
            let vars = serde_json::to_string(&request.vars).context("serialize dbt vars")?;
            args.extend(["--vars".to_string(), vars]);
        }
        Ok(args)
    }

    fn run_results_path(&self) -> PathBuf {
        self.config.project_dir.join("target").join("run_results.json")
    }

    fn try_run(&self, request: &TransformRequest) -> Result<StepOutcome> {
        let args = self.args(request)?;
        tracing::info!(
            command = %format!("{} {}", self.config.executable, args.join(" ")),
            "Running dbt command"
        );

        let output = Command::new(&self.config.executable)
            .args(&args)
            .output()
            .with_context(|| format!("failed to spawn '{}'", self.config.executable))?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            if !line.trim().is_empty() {
                tracing::info!("dbt: {line}");
            }
        }
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            if !line.trim().is_empty() {
                tracing::error!("dbt error: {line}");
            }
        }

        if !output.status.success() {
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            tracing::error!(code = %code, "dbt command failed");
            return Ok(StepOutcome::failure(
                FailureKind::Transformation,
                format!("dbt command failed with exit code {code}"),
            ));
        }

        summarize_run_results(&self.run_results_path())
    }
}

impl Transformer for DbtTransformer {
    fn run(&self, request: &TransformRequest) -> StepOutcome {
        self.try_run(request).unwrap_or_else(|e| {
            tracing::error!(error = %format!("{e:#}"), "Error running dbt command");
            StepOutcome::failure(
                FailureKind::Transformation,
                format!("Error running dbt command: {e:#}"),
            )
        })
    }
}

/// Fold dbt run artifacts into an outcome. A missing file means dbt
/// produced no artifacts and counts as zero rows.
fn summarize_run_results(path: &Path) -> Result<StepOutcome> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "No run results found");
        return Ok(StepOutcome::success(0));
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Error reading dbt run results: {}", path.display()))?;
    let results: RunResults = serde_json::from_str(&content)
        .with_context(|| format!("Error reading dbt run results: {}", path.display()))?;

    let mut succeeded = 0usize;
    let mut failed = 0usize;
    let mut rows = 0u64;
    for model in &results.results {
        if model.status == "success" {
            succeeded += 1;
            let affected = model.adapter_response.rows_affected.unwrap_or(0);
            rows = rows.saturating_add(u64::try_from(affected).unwrap_or(0));
        } else {
            failed += 1;
        }
    }

    tracing::info!(succeeded, failed, rows, "dbt results");
    if failed > 0 {
        return Ok(StepOutcome::failure(
            FailureKind::Transformation,
            "Some dbt models failed",
        ));
    }
    Ok(StepOutcome::success(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use strata_types::{PipelineId, PipelineLayer};

    /// Serializes tests that spawn processes so no forked child inherits a
    /// script's write handle (ETXTBSY).
    static SPAWN_LOCK: Mutex<()> = Mutex::new(());

    fn transform_config(project_dir: &Path) -> TransformConfig {
        TransformConfig {
            executable: "dbt".into(),
            project_dir: project_dir.to_path_buf(),
            target: Some("dev".into()),
            profiles_dir: None,
        }
    }

    fn orders(layer: PipelineLayer, load_type: LoadType) -> PipelineConfig {
        PipelineConfig {
            id: PipelineId::new("orders"),
            data_source: "orders".into(),
            source_table: "raw_orders".into(),
            destination_table: "fct_orders".into(),
            layer,
            load_type,
            active: true,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
    }

    #[test]
    fn pipeline_request_selects_layer_model() {
        let request = TransformRequest::for_pipeline(
            &orders(PipelineLayer::Silver, LoadType::Full),
            today(),
        );
        assert_eq!(request.selector.as_deref(), Some("silver.fct_orders"));
        assert!(request.full_refresh);
        assert_eq!(request.vars["source_table"], "raw_orders");
        assert_eq!(request.vars["date"], "2024-01-15");

        let incremental = TransformRequest::for_pipeline(
            &orders(PipelineLayer::Gold, LoadType::Incremental),
            today(),
        );
        assert!(!incremental.full_refresh);
    }

    #[test]
    fn args_for_pipeline_request() {
        let dbt = DbtTransformer::new(transform_config(Path::new("/srv/dbt")));
        let request = TransformRequest::for_pipeline(
            &orders(PipelineLayer::Silver, LoadType::Full),
            today(),
        );
        let args = dbt.args(&request).unwrap();
        assert_eq!(
            args,
            [
                "run",
                "--project-dir",
                "/srv/dbt",
                "--target",
                "dev",
                "--select",
                "silver.fct_orders",
                "--full-refresh",
                "--vars",
                r#"{"date":"2024-01-15","source_table":"raw_orders"}"#,
            ]
        );
    }

    #[test]
    fn args_for_all_models() {
        let dbt = DbtTransformer::new(TransformConfig {
            profiles_dir: Some(PathBuf::from("/home/etl/.dbt")),
            target: None,
            ..transform_config(Path::new("/srv/dbt"))
        });
        let args = dbt.args(&TransformRequest::all_models(false)).unwrap();
        assert_eq!(
            args,
            ["run", "--project-dir", "/srv/dbt", "--profiles-dir", "/home/etl/.dbt"]
        );
    }

    #[test]
    fn run_results_sum_rows_of_successful_models() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_results.json");
        std::fs::write(
            &path,
            r#"{"results": [
                {"status": "success", "adapter_response": {"rows_affected": 120}},
                {"status": "success", "adapter_response": {}},
                {"status": "success", "adapter_response": {"rows_affected": 30}}
            ]}"#,
        )
        .unwrap();
        assert_eq!(summarize_run_results(&path).unwrap(), StepOutcome::success(150));
    }

    #[test]
    fn run_results_with_failed_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_results.json");
        std::fs::write(
            &path,
            r#"{"results": [
                {"status": "success", "adapter_response": {"rows_affected": 5}},
                {"status": "error"}
            ]}"#,
        )
        .unwrap();
        let outcome = summarize_run_results(&path).unwrap();
        assert_eq!(outcome.error(), Some("Some dbt models failed"));
    }

    #[test]
    fn missing_run_results_is_zero_rows() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = summarize_run_results(&dir.path().join("run_results.json")).unwrap();
        assert_eq!(outcome, StepOutcome::success(0));
    }

    #[test]
    fn corrupt_run_results_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_results.json");
        std::fs::write(&path, "not json").unwrap();
        let err = summarize_run_results(&path).unwrap_err().to_string();
        assert!(err.contains("Error reading dbt run results"), "got: {err}");
    }

    #[test]
    fn missing_executable_is_a_transformation_failure() {
        let _guard = SPAWN_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let dir = tempfile::tempdir().unwrap();
        let dbt = DbtTransformer::new(TransformConfig {
            executable: "/nonexistent/bin/dbt".into(),
            ..transform_config(dir.path())
        });
        let outcome = dbt.run(&TransformRequest::all_models(false));
        let StepOutcome::Failure { kind, message } = outcome else {
            panic!("expected failure");
        };
        assert_eq!(kind, FailureKind::Transformation);
        assert!(message.starts_with("Error running dbt command"), "got: {message}");
    }

    #[cfg(unix)]
    mod subprocess {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        /// Write an executable shell script standing in for dbt.
        fn fake_dbt(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("fake-dbt");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[test]
        fn successful_run_reads_artifacts() {
            let _guard = SPAWN_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let dir = tempfile::tempdir().unwrap();
            let project = dir.path().join("project");
            std::fs::create_dir_all(project.join("target")).unwrap();
            std::fs::write(
                project.join("target/run_results.json"),
                r#"{"results": [{"status": "success", "adapter_response": {"rows_affected": 42}}]}"#,
            )
            .unwrap();
            let exe = fake_dbt(dir.path(), "echo \"$@\" > \"$(dirname \"$0\")/args.txt\"");

            let dbt = DbtTransformer::new(TransformConfig {
                executable: exe.display().to_string(),
                project_dir: project.clone(),
                target: None,
                profiles_dir: None,
            });
            let outcome = dbt.run(&TransformRequest::all_models(true));
            assert_eq!(outcome, StepOutcome::success(42));

            let args = std::fs::read_to_string(dir.path().join("args.txt")).unwrap();
            assert_eq!(
                args.trim(),
                format!("run --project-dir {} --full-refresh", project.display())
            );
        }

        #[test]
        fn non_zero_exit_reports_code() {
            let _guard = SPAWN_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let dir = tempfile::tempdir().unwrap();
            let exe = fake_dbt(dir.path(), "echo 'compilation error' >&2\nexit 2");
            let dbt = DbtTransformer::new(TransformConfig {
                executable: exe.display().to_string(),
                project_dir: dir.path().to_path_buf(),
                target: None,
                profiles_dir: None,
            });
            let outcome = dbt.run(&TransformRequest::all_models(false));
            assert_eq!(
                outcome.error(),
                Some("dbt command failed with exit code 2")
            );
        }
    }
}
