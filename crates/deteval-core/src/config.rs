//! Evaluation configuration: a typed, immutable value built by a staged
//! merge pipeline.
//!
//! Merge order is load-bearing: the base YAML file sets defaults,
//! `key=value` overrides win over the file, and dataset-name resolution
//! wins over both for the dataset-list/class-count fields. Once
//! `finalize()` has validated the result, the configuration never mutates
//! again: it is passed by value in-process and serialized into a
//! snapshot for worker processes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tracing::debug;

use crate::dataset::{self, DatasetEval};
use crate::error::{EvalError, Result};
use crate::snapshot::ConfigSnapshot;

/// Datasets the run iterates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    /// Concrete dataset identifiers, resolved before finalization.
    pub datasets: Vec<String>,
}

/// Model-head facts the engine needs to size its outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Number of object classes, background included. Must be positive.
    pub num_classes: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self { num_classes: 0 }
    }
}

/// How the external inference engine collaborator is invoked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine executable.
    pub program: String,

    /// Arguments prepended to every engine invocation.
    pub args: Vec<String>,

    /// Known-good baseline for the expected-results check, if any.
    pub expected_results: Option<PathBuf>,
}

/// Resolved evaluation configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    pub test: TestConfig,
    pub model: ModelConfig,
    pub engine: EngineConfig,

    /// Advisory visualization toggle; forwarded to the engine untouched.
    pub vis: bool,

    /// Engine-owned sections carried through the merge and the worker
    /// snapshot without interpretation.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Staged configuration merge: file, then `key=value` overrides, then the
/// dataset registry. Later stages win.
#[derive(Debug)]
pub struct ConfigLoader {
    doc: Value,
}

impl ConfigLoader {
    /// Start from a base YAML configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let doc: Value = serde_yaml::from_str(&raw)?;
        if !matches!(doc, Value::Mapping(_)) {
            return Err(EvalError::Config(format!(
                "config file {} must hold a mapping at the top level",
                path.display()
            )));
        }
        debug!(path = %path.display(), "loaded base config");
        Ok(Self { doc })
    }

    /// Start from an already-resolved snapshot (worker re-invocation).
    pub fn from_resolved(snapshot: &ConfigSnapshot) -> Result<Self> {
        let doc = serde_yaml::to_value(&snapshot.config)?;
        Ok(Self { doc })
    }

    /// Merge `key=value` pairs over the document. Keys are dotted paths;
    /// values are parsed as YAML scalars, so `81`, `true`, and
    /// `[a, b]` all do what they look like.
    pub fn apply_overrides(&mut self, pairs: &[String]) -> Result<()> {
        for pair in pairs {
            let (key, raw) = pair.split_once('=').ok_or_else(|| {
                EvalError::Config(format!("override '{pair}' is not of the form key=value"))
            })?;
            let value: Value = serde_yaml::from_str(raw)?;
            set_path(&mut self.doc, key, value)?;
            debug!(key, raw, "applied override");
        }
        Ok(())
    }

    /// Overwrite the dataset-list/class-count fields from a registry
    /// entry. Runs last; wins over the file and any override.
    pub fn apply_dataset(&mut self, entry: &DatasetEval) -> Result<()> {
        let datasets = Value::Sequence(
            entry
                .datasets
                .iter()
                .map(|name| Value::String((*name).to_string()))
                .collect(),
        );
        set_path(&mut self.doc, "test.datasets", datasets)?;
        set_path(
            &mut self.doc,
            "model.num_classes",
            Value::Number(entry.num_classes.into()),
        )?;
        debug!(dataset = entry.name, "applied dataset registry entry");
        Ok(())
    }

    /// Deserialize into the typed configuration and validate invariants.
    pub fn finalize(self) -> Result<EvalConfig> {
        let config: EvalConfig = serde_yaml::from_value(self.doc)?;
        validate(&config)?;
        Ok(config)
    }
}

/// Resolve the full configuration for one run.
///
/// `cfg_file` is either a plain YAML config or a resolved snapshot handed
/// down by the dispatching parent; the snapshot's marker and digest are
/// verified before its contents are trusted.
pub fn resolve(cfg_file: &Path, overrides: &[String], dataset: Option<&str>) -> Result<EvalConfig> {
    let mut loader = match ConfigSnapshot::sniff(cfg_file)? {
        Some(snapshot) => ConfigLoader::from_resolved(&snapshot)?,
        None => ConfigLoader::from_file(cfg_file)?,
    };
    loader.apply_overrides(overrides)?;
    if let Some(name) = dataset {
        let entry = dataset::lookup(name)
            .ok_or_else(|| EvalError::Config(format!("unknown dataset '{name}'")))?;
        loader.apply_dataset(entry)?;
    }
    loader.finalize()
}

fn validate(config: &EvalConfig) -> Result<()> {
    if config.test.datasets.is_empty() {
        return Err(EvalError::Config(
            "resolved dataset list is empty; pass --dataset or run against a resolved \
             config snapshot"
                .to_string(),
        ));
    }
    if config.model.num_classes == 0 {
        return Err(EvalError::Config(
            "model.num_classes must be positive".to_string(),
        ));
    }
    if config.engine.program.is_empty() {
        return Err(EvalError::Config(
            "engine.program must name the inference engine executable".to_string(),
        ));
    }
    Ok(())
}

fn set_path(doc: &mut Value, dotted: &str, value: Value) -> Result<()> {
    let segments: Vec<&str> = dotted.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(EvalError::Config(format!(
            "override key '{dotted}' is malformed"
        )));
    }
    let (last, parents) = segments
        .split_last()
        .expect("a dotted key has at least one segment");

    let mut node = doc;
    for segment in parents {
        let mapping = node.as_mapping_mut().ok_or_else(|| collision(dotted))?;
        node = mapping
            .entry(Value::String((*segment).to_string()))
            .or_insert_with(|| Value::Mapping(serde_yaml::Mapping::new()));
    }
    let mapping = node.as_mapping_mut().ok_or_else(|| collision(dotted))?;
    mapping.insert(Value::String((*last).to_string()), value);
    Ok(())
}

fn collision(dotted: &str) -> EvalError {
    EvalError::Config(format!(
        "override key '{dotted}' collides with a non-mapping value"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(yaml: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        file
    }

    const BASE: &str = "\
model:
  num_classes: 5
test:
  datasets: [bdd_peds_val]
engine:
  program: detect-engine
  args: [\"--quiet\"]
";

    #[test]
    fn test_file_only_resolution() {
        let file = write_config(BASE);
        let config = resolve(file.path(), &[], None).unwrap();
        assert_eq!(config.test.datasets, vec!["bdd_peds_val"]);
        assert_eq!(config.model.num_classes, 5);
        assert_eq!(config.engine.program, "detect-engine");
        assert!(!config.vis);
    }

    #[test]
    fn test_overrides_win_over_file() {
        let file = write_config(BASE);
        let overrides = vec![
            "model.num_classes=7".to_string(),
            "vis=true".to_string(),
            "engine.expected_results=/data/baseline.json".to_string(),
        ];
        let config = resolve(file.path(), &overrides, None).unwrap();
        assert_eq!(config.model.num_classes, 7);
        assert!(config.vis);
        assert_eq!(
            config.engine.expected_results,
            Some(PathBuf::from("/data/baseline.json"))
        );
    }

    #[test]
    fn test_dataset_resolution_wins_over_file_and_overrides() {
        let file = write_config(BASE);
        let overrides = vec!["model.num_classes=7".to_string()];
        let config = resolve(file.path(), &overrides, Some("coco2017")).unwrap();
        assert_eq!(config.test.datasets, vec!["coco_2017_val"]);
        assert_eq!(config.model.num_classes, 81);
    }

    #[test]
    fn test_resolving_twice_yields_identical_config() {
        let file = write_config(BASE);
        let a = resolve(file.path(), &[], Some("coco2017")).unwrap();
        let b = resolve(file.path(), &[], Some("coco2017")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_unknown_dataset_fails() {
        let file = write_config(BASE);
        let err = resolve(file.path(), &[], Some("coco2018")).unwrap_err();
        assert!(matches!(err, EvalError::Config(_)));
        assert!(err.to_string().contains("unknown dataset"));
    }

    #[test]
    fn test_empty_dataset_list_fails_finalization() {
        let file = write_config("engine:\n  program: detect-engine\nmodel:\n  num_classes: 2\n");
        let err = resolve(file.path(), &[], None).unwrap_err();
        assert!(matches!(err, EvalError::Config(_)));
    }

    #[test]
    fn test_zero_classes_fails_finalization() {
        let file = write_config(
            "test:\n  datasets: [coco_2017_val]\nengine:\n  program: detect-engine\n",
        );
        assert!(resolve(file.path(), &[], None).is_err());
    }

    #[test]
    fn test_missing_engine_program_fails_finalization() {
        let file = write_config("test:\n  datasets: [x]\nmodel:\n  num_classes: 2\n");
        assert!(resolve(file.path(), &[], None).is_err());
    }

    #[test]
    fn test_malformed_override_fails() {
        let file = write_config(BASE);
        let err = resolve(file.path(), &["novalue".to_string()], None).unwrap_err();
        assert!(err.to_string().contains("key=value"));
    }

    #[test]
    fn test_override_through_scalar_collides() {
        let file = write_config(BASE);
        let err =
            resolve(file.path(), &["engine.program.x=1".to_string()], None).unwrap_err();
        assert!(err.to_string().contains("collides"));
    }

    #[test]
    fn test_engine_owned_sections_survive_the_merge() {
        let yaml = format!("{BASE}postprocess:\n  nms_threshold: 0.5\n");
        let file = write_config(&yaml);
        let config = resolve(file.path(), &[], None).unwrap();
        assert!(config.extra.contains_key("postprocess"));

        // And they survive a JSON round-trip (the snapshot encoding).
        let json = serde_json::to_string(&config).unwrap();
        let back: EvalConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn test_non_mapping_config_root_is_rejected() {
        let file = write_config("- just\n- a\n- list\n");
        assert!(ConfigLoader::from_file(file.path()).is_err());
    }
}
