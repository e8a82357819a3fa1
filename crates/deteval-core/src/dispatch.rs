//! Top-level run orchestration.
//!
//! `run_inference` decides between the terminal in-process path and the
//! multi-device fan-out, joins every worker, re-assembles results in
//! shard index order, and records a run manifest under the output
//! directory. The expected-results check is advisory: mismatches are
//! logged as warnings, never failures.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EvalConfig;
use crate::device::DeviceOrdinal;
use crate::engine::{artifact_path, InferenceEngine, InferenceRequest, RunOutcome, ShardOutcome};
use crate::error::{EvalError, Result};
use crate::plan::ExecutionPlan;
use crate::shard::{assign, partition, IndexRange};
use crate::snapshot::ConfigSnapshot;
use crate::worker::{WorkerLauncher, WorkerReport};

/// File name of the run manifest written under the output directory.
pub const MANIFEST_FILE: &str = "run_manifest.json";

/// One shard's entry in the run manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardRecord {
    /// Range the shard covered; `None` for a full-dataset run.
    pub range: Option<IndexRange>,

    /// Device the shard ran on.
    pub device: DeviceOrdinal,

    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

/// Record of one completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub datasets: Vec<String>,
    pub items: usize,
    pub artifact: PathBuf,
    pub shards: Vec<ShardRecord>,
}

impl RunManifest {
    fn write(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(MANIFEST_FILE);
        std::fs::write(&path, serde_json::to_vec_pretty(self)?)?;
        Ok(path)
    }
}

/// Run inference over the resolved dataset.
///
/// The single entry point the CLI consumes. With multi-GPU off this is
/// the terminal, non-recursive case: one in-process engine call over
/// `ind_range` (or the full dataset). With multi-GPU on, the run fans
/// out across one worker process per visible device.
pub async fn run_inference(
    engine: Arc<dyn InferenceEngine>,
    config: &EvalConfig,
    plan: &ExecutionPlan,
    ind_range: Option<IndexRange>,
    check_expected_results: bool,
) -> Result<RunOutcome> {
    if plan.multi_gpu {
        let launcher = WorkerLauncher::current_exe()?;
        multi_device_run(engine, config, plan, ind_range, check_expected_results, &launcher).await
    } else {
        single_device_run(engine, config, plan, ind_range, check_expected_results).await
    }
}

/// Terminal case: one synchronous engine call on this process's device.
///
/// A ranged run (a dispatched worker shard, or an operator's manual
/// `--range`) produces its range artifact only. Merging and the
/// expected-results check belong to whoever owns the whole domain;
/// checking a partial result against a whole-dataset baseline would
/// always mismatch.
pub async fn single_device_run(
    engine: Arc<dyn InferenceEngine>,
    config: &EvalConfig,
    plan: &ExecutionPlan,
    ind_range: Option<IndexRange>,
    check_expected_results: bool,
) -> Result<RunOutcome> {
    let started_at = Utc::now();
    let timer = Instant::now();
    let device = plan.devices[0];

    let request = InferenceRequest {
        config: config.clone(),
        weights: plan.weights.clone(),
        range: ind_range,
        device,
        output_dir: plan.output_dir.clone(),
    };
    info!(device = %device, "running inference in-process");
    let outcome = engine.run(&request).await?;
    let duration_ms = timer.elapsed().as_millis() as u64;

    if let Some(range) = ind_range {
        info!(shard = %range, artifact = %outcome.artifact.display(), "shard artifact written");
        return Ok(RunOutcome {
            artifact: outcome.artifact,
            items: outcome.items,
            shards: 1,
        });
    }

    let merged = engine.merge(config, vec![outcome], &plan.output_dir).await?;
    if check_expected_results {
        report_mismatches(engine.as_ref(), &merged, config).await?;
    }

    let manifest = RunManifest {
        run_id: Uuid::new_v4().to_string(),
        started_at,
        finished_at: Utc::now(),
        datasets: config.test.datasets.clone(),
        items: merged.items,
        artifact: merged.artifact.clone(),
        shards: vec![ShardRecord {
            range: None,
            device,
            duration_ms,
        }],
    };
    manifest.write(&plan.output_dir)?;
    info!(run_id = %manifest.run_id, items = merged.items, "evaluation complete");
    Ok(merged)
}

/// Fan-out case: one worker process per visible device.
///
/// Public with an explicit launcher so tests can substitute a stub
/// program; production goes through [`run_inference`], which re-invokes
/// the current executable.
pub async fn multi_device_run(
    engine: Arc<dyn InferenceEngine>,
    config: &EvalConfig,
    plan: &ExecutionPlan,
    ind_range: Option<IndexRange>,
    check_expected_results: bool,
    launcher: &WorkerLauncher,
) -> Result<RunOutcome> {
    let started_at = Utc::now();
    let run_id = Uuid::new_v4().to_string();

    let total = engine.num_items(config).await?;
    if total == 0 {
        return Err(EvalError::Engine("evaluation set is empty".to_string()));
    }
    let domain = match ind_range {
        Some(range) => {
            if range.end > total {
                return Err(EvalError::Usage(format!(
                    "--range end {} exceeds the evaluation set size {total}",
                    range.end
                )));
            }
            range
        }
        None => IndexRange::new(0, total)?,
    };

    let shards = partition(domain, plan.devices.len())?;
    let jobs = assign(&shards, &plan.devices)?;
    let snapshot = ConfigSnapshot::write(&plan.output_dir, config)?;

    info!(
        run_id = %run_id,
        workers = jobs.len(),
        domain = %domain,
        snapshot = %snapshot.display(),
        "dispatching shard workers"
    );

    let mut handles = Vec::with_capacity(jobs.len());
    for job in &jobs {
        handles.push(launcher.spawn(&snapshot, *job, plan)?);
    }

    // Join every worker before reacting to failures: no partial results
    // are consumed while any worker still runs. Joining in shard index
    // order keeps the merge deterministic regardless of which worker
    // finishes first.
    let mut joined = Vec::with_capacity(handles.len());
    for handle in handles {
        joined.push(handle.join().await);
    }
    let reports: Vec<WorkerReport> = joined.into_iter().collect::<Result<_>>()?;

    let outcomes: Vec<ShardOutcome> = reports
        .iter()
        .map(|report| ShardOutcome {
            range: Some(report.shard.range),
            artifact: artifact_path(&plan.output_dir, Some(report.shard.range)),
            items: report.shard.range.len(),
        })
        .collect();

    let merged = engine.merge(config, outcomes, &plan.output_dir).await?;
    if check_expected_results {
        report_mismatches(engine.as_ref(), &merged, config).await?;
    }

    let manifest = RunManifest {
        run_id,
        started_at,
        finished_at: Utc::now(),
        datasets: config.test.datasets.clone(),
        items: merged.items,
        artifact: merged.artifact.clone(),
        shards: reports
            .iter()
            .map(|report| ShardRecord {
                range: Some(report.shard.range),
                device: report.shard.device,
                duration_ms: report.duration_ms,
            })
            .collect(),
    };
    manifest.write(&plan.output_dir)?;
    info!(run_id = %manifest.run_id, items = merged.items, "multi-device run complete");
    Ok(merged)
}

async fn report_mismatches(
    engine: &dyn InferenceEngine,
    outcome: &RunOutcome,
    config: &EvalConfig,
) -> Result<()> {
    let mismatches = engine.check_expected_results(outcome, config).await?;
    for mismatch in &mismatches {
        warn!(%mismatch, "result differs from the expected baseline");
    }
    if mismatches.is_empty() {
        debug!("results match the expected baseline");
    }
    Ok(())
}
