//! Deteval Core Library
//!
//! Inference job orchestration for detection evaluation:
//!
//! - resolve a dataset name into a typed evaluation configuration
//! - validate the execution mode (devices, weight source, output dir)
//! - partition the evaluation set and dispatch one worker per device
//! - hand inference itself to the engine collaborator behind a trait

pub mod config;
pub mod dataset;
pub mod device;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod fakes;
pub mod plan;
pub mod shard;
pub mod snapshot;
pub mod telemetry;
pub mod worker;

pub use config::{resolve, ConfigLoader, EngineConfig, EvalConfig, ModelConfig, TestConfig};
pub use dataset::{known_names, lookup, DatasetEval};
pub use device::{parse_visible_spec, visible_devices, DeviceOrdinal, VISIBLE_DEVICES_ENV};
pub use dispatch::{
    multi_device_run, run_inference, single_device_run, RunManifest, ShardRecord, MANIFEST_FILE,
};
pub use engine::{
    artifact_path, CommandEngine, InferenceEngine, InferenceRequest, RunOutcome, ShardOutcome,
};
pub use error::{EvalError, Result};
pub use plan::{ExecutionPlan, WeightSource};
pub use shard::{assign, partition, IndexRange, JobShard};
pub use snapshot::{ConfigSnapshot, SNAPSHOT_FILE};
pub use telemetry::init_tracing;
pub use worker::{WorkerHandle, WorkerLauncher, WorkerReport};
