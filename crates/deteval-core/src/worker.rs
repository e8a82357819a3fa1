//! Worker process launch and join for multi-device dispatch.
//!
//! Each shard becomes one independent worker process: the orchestration
//! entry point re-invoked against the resolved config snapshot, with
//! multi-GPU forced off (so the worker takes the terminal path) and the
//! shard's device pinned through `CUDA_VISIBLE_DEVICES`. Workers are
//! spawned with `kill_on_drop`, so tearing down the orchestrator tears
//! its workers down with it instead of leaving them orphaned.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::device::VISIBLE_DEVICES_ENV;
use crate::error::{EvalError, Result};
use crate::plan::ExecutionPlan;
use crate::shard::JobShard;

/// Spawns one worker process per shard.
pub struct WorkerLauncher {
    /// Program re-invoked for each shard (the orchestration entry point).
    program: PathBuf,

    /// Arguments placed before the per-shard flags.
    base_args: Vec<String>,
}

impl WorkerLauncher {
    /// Launcher re-invoking the current executable, the production path.
    pub fn current_exe() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            base_args: Vec::new(),
        }
    }

    /// Prepend fixed arguments (used by tests to route through `sh`).
    pub fn with_base_args(mut self, args: Vec<String>) -> Self {
        self.base_args = args;
        self
    }

    /// Spawn one worker for `shard`.
    pub fn spawn(&self, snapshot: &Path, shard: JobShard, plan: &ExecutionPlan) -> Result<WorkerHandle> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args)
            .arg("--cfg")
            .arg(snapshot)
            .arg(plan.weights.flag())
            .arg(plan.weights.path())
            .arg("--output_dir")
            .arg(&plan.output_dir)
            .arg("--range")
            .arg(shard.range.start.to_string())
            .arg(shard.range.end.to_string())
            .env(VISIBLE_DEVICES_ENV, shard.device.0.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(shard = %shard.range, device = %shard.device, "spawning worker");
        let child = cmd.spawn()?;
        Ok(WorkerHandle {
            shard,
            child,
            started: Instant::now(),
        })
    }
}

/// A running worker, joined exactly once.
pub struct WorkerHandle {
    pub shard: JobShard,
    child: Child,
    started: Instant,
}

/// What a joined worker reports back.
#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub shard: JobShard,
    pub duration_ms: u64,
}

impl WorkerHandle {
    /// Wait for the worker to exit. A non-zero exit is fatal for the
    /// whole job and surfaces as [`EvalError::Worker`].
    pub async fn join(self) -> Result<WorkerReport> {
        let output = self.child.wait_with_output().await?;
        let duration_ms = self.started.elapsed().as_millis() as u64;

        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                shard = %self.shard.range,
                exit_code,
                stderr = %stderr.trim(),
                "worker failed"
            );
            return Err(EvalError::Worker {
                shard: self.shard.range,
                exit_code,
            });
        }

        info!(shard = %self.shard.range, duration_ms, "worker finished");
        Ok(WorkerReport {
            shard: self.shard,
            duration_ms,
        })
    }
}
