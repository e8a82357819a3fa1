//! Inference-engine collaborator seam.
//!
//! The orchestration layer never runs model code itself. It reaches the
//! engine through the [`InferenceEngine`] trait: dataset sizing, per-range
//! inference, index-ordered merging, and the optional expected-results
//! check. The production binding ([`CommandEngine`]) turns each trait call
//! into one invocation of the configured engine executable; tests use
//! [`crate::fakes::MemoryEngine`].

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use crate::config::EvalConfig;
use crate::device::{DeviceOrdinal, VISIBLE_DEVICES_ENV};
use crate::error::{EvalError, Result};
use crate::plan::WeightSource;
use crate::shard::IndexRange;

/// One inference call: configuration, weights, an optional index range,
/// and the device the call is pinned to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub config: EvalConfig,
    pub weights: WeightSource,
    pub range: Option<IndexRange>,
    pub device: DeviceOrdinal,
    pub output_dir: PathBuf,
}

/// Result handle for one evaluated range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardOutcome {
    /// Range this outcome covers; `None` means the full dataset.
    pub range: Option<IndexRange>,

    /// Result artifact written by the engine.
    pub artifact: PathBuf,

    /// Number of items evaluated.
    pub items: usize,
}

/// Merged, index-ordered result set for a whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub artifact: PathBuf,
    pub items: usize,
    pub shards: usize,
}

/// Deterministic artifact location shared by the orchestrator and the
/// engine: `detections.json` for a full run, `detections_range_S_E.json`
/// for a ranged one. The artifact format itself is engine-owned.
pub fn artifact_path(output_dir: &Path, range: Option<IndexRange>) -> PathBuf {
    match range {
        Some(r) => output_dir.join(format!("detections_range_{}_{}.json", r.start, r.end)),
        None => output_dir.join("detections.json"),
    }
}

/// The orchestration layer's only view of the inference engine.
///
/// Implementations must be safe to share behind `Arc<dyn InferenceEngine>`.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Total number of items in the resolved evaluation set.
    async fn num_items(&self, config: &EvalConfig) -> Result<usize>;

    /// Run inference over one request, synchronously to completion.
    async fn run(&self, request: &InferenceRequest) -> Result<ShardOutcome>;

    /// Merge per-shard outcomes (already sorted by shard index) into a
    /// single result set under `output_dir`.
    async fn merge(
        &self,
        config: &EvalConfig,
        outcomes: Vec<ShardOutcome>,
        output_dir: &Path,
    ) -> Result<RunOutcome>;

    /// Compare a merged outcome against the known-good baseline. Returns
    /// one human-readable description per mismatch; never fatal.
    async fn check_expected_results(
        &self,
        outcome: &RunOutcome,
        config: &EvalConfig,
    ) -> Result<Vec<String>>;
}

/// Production engine binding.
///
/// Invocation contract (`<program> <args..>` comes from the
/// configuration; the artifact format stays engine-owned):
///
/// - `num-items --config <config.json>`: prints the evaluation-set size
/// - `infer --config <config.json> --weights <path> --weights-format
///   <checkpoint|detectron> --output <artifact> [--start S --end E]`,
///   with the target device pinned via `CUDA_VISIBLE_DEVICES`
/// - `merge --output <artifact> <shard-artifact>...` (index order)
/// - `check --results <artifact> --expected <baseline>`: prints one
///   mismatch per line
pub struct CommandEngine {
    /// Where the engine-facing config file and artifacts live.
    scratch_dir: PathBuf,
}

impl CommandEngine {
    pub fn new(scratch_dir: PathBuf) -> Self {
        Self { scratch_dir }
    }

    fn base_command(&self, config: &EvalConfig) -> Command {
        let mut cmd = Command::new(&config.engine.program);
        cmd.args(&config.engine.args);
        cmd
    }

    /// Serialize the configuration for the engine. Idempotent: every
    /// invocation writes the same bytes for the same resolved config.
    fn write_engine_config(&self, config: &EvalConfig) -> Result<PathBuf> {
        let path = self.scratch_dir.join("engine_config.json");
        std::fs::write(&path, serde_json::to_vec_pretty(config)?)?;
        Ok(path)
    }

    async fn run_capture(mut cmd: Command, what: &str) -> Result<String> {
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        debug!(what, "invoking inference engine");
        let child = cmd.spawn()?;
        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EvalError::Engine(format!(
                "engine {what} exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl InferenceEngine for CommandEngine {
    async fn num_items(&self, config: &EvalConfig) -> Result<usize> {
        let config_path = self.write_engine_config(config)?;
        let mut cmd = self.base_command(config);
        cmd.arg("num-items").arg("--config").arg(&config_path);
        let stdout = Self::run_capture(cmd, "num-items").await?;
        stdout
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .and_then(|line| line.trim().parse::<usize>().ok())
            .ok_or_else(|| {
                EvalError::Engine(format!(
                    "engine num-items printed no item count: {:?}",
                    stdout.trim()
                ))
            })
    }

    async fn run(&self, request: &InferenceRequest) -> Result<ShardOutcome> {
        let config_path = self.write_engine_config(&request.config)?;
        let artifact = artifact_path(&request.output_dir, request.range);

        let mut cmd = self.base_command(&request.config);
        cmd.arg("infer")
            .arg("--config")
            .arg(&config_path)
            .arg("--weights")
            .arg(request.weights.path())
            .arg("--weights-format")
            .arg(request.weights.format_name())
            .arg("--output")
            .arg(&artifact)
            .env(VISIBLE_DEVICES_ENV, request.device.0.to_string());
        if let Some(range) = request.range {
            cmd.arg("--start")
                .arg(range.start.to_string())
                .arg("--end")
                .arg(range.end.to_string());
        }
        Self::run_capture(cmd, "infer").await?;

        let items = match request.range {
            Some(range) => range.len(),
            None => self.num_items(&request.config).await?,
        };
        Ok(ShardOutcome {
            range: request.range,
            artifact,
            items,
        })
    }

    async fn merge(
        &self,
        config: &EvalConfig,
        outcomes: Vec<ShardOutcome>,
        output_dir: &Path,
    ) -> Result<RunOutcome> {
        if outcomes.is_empty() {
            return Err(EvalError::Engine("nothing to merge".to_string()));
        }
        let artifact = artifact_path(output_dir, None);
        let items = outcomes.iter().map(|o| o.items).sum();
        let shards = outcomes.len();

        // A single full-range outcome already is the merged artifact.
        if shards == 1 && outcomes[0].range.is_none() {
            return Ok(RunOutcome {
                artifact: outcomes[0].artifact.clone(),
                items,
                shards,
            });
        }

        let mut cmd = self.base_command(config);
        cmd.arg("merge").arg("--output").arg(&artifact);
        for outcome in &outcomes {
            cmd.arg(&outcome.artifact);
        }
        Self::run_capture(cmd, "merge").await?;

        Ok(RunOutcome {
            artifact,
            items,
            shards,
        })
    }

    async fn check_expected_results(
        &self,
        outcome: &RunOutcome,
        config: &EvalConfig,
    ) -> Result<Vec<String>> {
        let Some(baseline) = &config.engine.expected_results else {
            debug!("no expected-results baseline configured; skipping check");
            return Ok(Vec::new());
        };
        let mut cmd = self.base_command(config);
        cmd.arg("check")
            .arg("--results")
            .arg(&outcome.artifact)
            .arg("--expected")
            .arg(baseline);
        let stdout = Self::run_capture(cmd, "check").await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, ModelConfig, TestConfig};

    fn shell_engine(script: &str) -> EvalConfig {
        EvalConfig {
            test: TestConfig {
                datasets: vec!["coco_2017_val".to_string()],
            },
            model: ModelConfig { num_classes: 81 },
            engine: EngineConfig {
                // `sh -c '<script>' engine <subcommand> ...`; the trailing
                // arguments land in $1.., which the stubs ignore.
                program: "sh".to_string(),
                args: vec!["-c".to_string(), script.to_string(), "engine".to_string()],
                expected_results: None,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_artifact_path_naming() {
        let dir = Path::new("/out");
        assert_eq!(artifact_path(dir, None), PathBuf::from("/out/detections.json"));
        let range = IndexRange::new(250, 500).unwrap();
        assert_eq!(
            artifact_path(dir, Some(range)),
            PathBuf::from("/out/detections_range_250_500.json")
        );
    }

    #[tokio::test]
    async fn test_num_items_parses_the_last_line() {
        let dir = tempfile::tempdir().unwrap();
        let engine = CommandEngine::new(dir.path().to_path_buf());
        let config = shell_engine("echo loading; echo 1234");
        assert_eq!(engine.num_items(&config).await.unwrap(), 1234);
    }

    #[tokio::test]
    async fn test_num_items_rejects_garbage_output() {
        let dir = tempfile::tempdir().unwrap();
        let engine = CommandEngine::new(dir.path().to_path_buf());
        let config = shell_engine("echo not-a-number");
        let err = engine.num_items(&config).await.unwrap_err();
        assert!(matches!(err, EvalError::Engine(_)));
    }

    #[tokio::test]
    async fn test_failing_engine_surfaces_exit_code_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let engine = CommandEngine::new(dir.path().to_path_buf());
        let config = shell_engine("echo boom >&2; exit 9");
        let err = engine.num_items(&config).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("9"), "{message}");
        assert!(message.contains("boom"), "{message}");
    }

    #[tokio::test]
    async fn test_run_builds_a_ranged_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let engine = CommandEngine::new(dir.path().to_path_buf());
        let request = InferenceRequest {
            config: shell_engine("exit 0"),
            weights: WeightSource::Checkpoint(PathBuf::from("/m/ckpt/model.pt")),
            range: Some(IndexRange::new(0, 250).unwrap()),
            device: DeviceOrdinal(0),
            output_dir: dir.path().to_path_buf(),
        };
        let outcome = engine.run(&request).await.unwrap();
        assert_eq!(outcome.items, 250);
        assert_eq!(
            outcome.artifact,
            dir.path().join("detections_range_0_250.json")
        );
    }
}
