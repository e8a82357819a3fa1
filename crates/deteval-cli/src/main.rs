//! deteval: run a trained detection model over evaluation datasets.
//!
//! The binary is a thin shell over `deteval-core`: it resolves the
//! dataset configuration, validates the execution mode, and either runs
//! inference in-process or fans out one worker process per visible
//! device. Worker processes re-enter this same entry point against the
//! resolved config snapshot with multi-GPU forced off.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};

use deteval_core::{
    run_inference, CommandEngine, ExecutionPlan, IndexRange, InferenceEngine, WeightSource,
};

#[derive(Parser, Debug)]
#[command(name = "deteval")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run a trained detection model over one or more evaluation datasets", long_about = None)]
struct Cli {
    /// Evaluation dataset name from the built-in registry
    #[arg(long)]
    dataset: Option<String>,

    /// Base configuration file (YAML); workers receive the resolved
    /// snapshot here instead
    #[arg(long, value_name = "FILE")]
    cfg: PathBuf,

    /// Checkpoint weights to load
    #[arg(long = "load_ckpt", value_name = "FILE")]
    load_ckpt: Option<PathBuf>,

    /// Legacy Detectron weights to load
    #[arg(long = "load_detectron", value_name = "FILE")]
    load_detectron: Option<PathBuf>,

    /// Output directory for results; defaults to <weights>/../../test
    #[arg(long = "output_dir", value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Configuration overrides (key=value), applied after the config file
    #[arg(long = "set", value_name = "KEY=VALUE", num_args = 0..)]
    set_cfgs: Vec<String>,

    /// Start (inclusive) and end (exclusive) dataset indices
    #[arg(long, num_args = 2, value_names = ["START", "END"])]
    range: Option<Vec<usize>>,

    /// Fan out one worker process per visible device
    #[arg(long = "multi-gpu-testing")]
    multi_gpu_testing: bool,

    /// Visualize detections (advisory; forwarded to the engine)
    #[arg(long)]
    vis: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    deteval_core::init_tracing(cli.json, level);

    // Hard precondition, checked before any argument-dependent
    // validation: without an accelerator there is nothing to run on.
    let devices =
        deteval_core::visible_devices().context("a compatible accelerator is required")?;

    info!(?cli, "called with args");

    let weights = WeightSource::from_flags(cli.load_ckpt.clone(), cli.load_detectron.clone())?;
    let plan = ExecutionPlan::validate(
        weights,
        devices,
        cli.multi_gpu_testing,
        cli.output_dir.clone(),
    )?;

    let mut config = deteval_core::resolve(&cli.cfg, &cli.set_cfgs, cli.dataset.as_deref())
        .context("failed to resolve the evaluation configuration")?;
    if cli.vis {
        config.vis = true;
    }
    info!(
        config = %serde_json::to_string_pretty(&config)?,
        "testing with config"
    );

    let ind_range = match &cli.range {
        Some(bounds) => Some(IndexRange::new(bounds[0], bounds[1])?),
        None => None,
    };

    let engine: Arc<dyn InferenceEngine> = Arc::new(CommandEngine::new(plan.output_dir.clone()));
    let outcome = run_inference(engine, &config, &plan, ind_range, true).await?;

    info!(
        items = outcome.items,
        artifact = %outcome.artifact.display(),
        "results written"
    );
    Ok(())
}
