//! In-memory fakes for the engine seam (testing only)
//!
//! Provides `MemoryEngine`, an [`InferenceEngine`] that satisfies the
//! trait contract without spawning anything, while recording every call
//! for assertions.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::config::EvalConfig;
use crate::engine::{
    artifact_path, InferenceEngine, InferenceRequest, RunOutcome, ShardOutcome,
};
use crate::error::Result;

/// In-memory engine with a fixed dataset size and scripted check output.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    items: usize,
    mismatches: Vec<String>,
    run_calls: Mutex<Vec<InferenceRequest>>,
    merge_calls: Mutex<Vec<Vec<ShardOutcome>>>,
    check_calls: Mutex<usize>,
}

impl MemoryEngine {
    /// An engine whose evaluation set holds `items` items.
    pub fn new(items: usize) -> Self {
        Self {
            items,
            ..Default::default()
        }
    }

    /// Script the expected-results check to report these mismatches.
    pub fn with_mismatches(mut self, mismatches: Vec<String>) -> Self {
        self.mismatches = mismatches;
        self
    }

    /// Every request `run` received, in call order.
    pub fn run_requests(&self) -> Vec<InferenceRequest> {
        self.run_calls.lock().unwrap().clone()
    }

    /// Every outcome set `merge` received, in call order.
    pub fn merged_sets(&self) -> Vec<Vec<ShardOutcome>> {
        self.merge_calls.lock().unwrap().clone()
    }

    /// How often the expected-results check ran.
    pub fn check_count(&self) -> usize {
        *self.check_calls.lock().unwrap()
    }
}

#[async_trait]
impl InferenceEngine for MemoryEngine {
    async fn num_items(&self, _config: &EvalConfig) -> Result<usize> {
        Ok(self.items)
    }

    async fn run(&self, request: &InferenceRequest) -> Result<ShardOutcome> {
        self.run_calls.lock().unwrap().push(request.clone());
        let items = match request.range {
            Some(range) => range.len(),
            None => self.items,
        };
        Ok(ShardOutcome {
            range: request.range,
            artifact: artifact_path(&request.output_dir, request.range),
            items,
        })
    }

    async fn merge(
        &self,
        _config: &EvalConfig,
        outcomes: Vec<ShardOutcome>,
        output_dir: &Path,
    ) -> Result<RunOutcome> {
        self.merge_calls.lock().unwrap().push(outcomes.clone());
        Ok(RunOutcome {
            artifact: artifact_path(output_dir, None),
            items: outcomes.iter().map(|o| o.items).sum(),
            shards: outcomes.len(),
        })
    }

    async fn check_expected_results(
        &self,
        _outcome: &RunOutcome,
        _config: &EvalConfig,
    ) -> Result<Vec<String>> {
        *self.check_calls.lock().unwrap() += 1;
        Ok(self.mismatches.clone())
    }
}
