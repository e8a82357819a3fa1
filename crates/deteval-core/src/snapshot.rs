//! Resolved-configuration snapshots handed from the dispatcher to its
//! worker processes.
//!
//! A worker must never guess whether its configuration was already
//! resolved. The snapshot makes the parent→worker contract explicit: a
//! `resolved` marker plus a SHA-256 digest over the canonical JSON
//! encoding of the configuration, both verified on load.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::EvalConfig;
use crate::error::{EvalError, Result};

/// File name the dispatcher writes under the output directory.
pub const SNAPSHOT_FILE: &str = "resolved_config.json";

/// A resolved configuration, sealed for transport across the process
/// boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    /// Marker making the parent→worker contract explicit.
    pub resolved: bool,

    /// SHA-256 hex digest over the canonical JSON encoding of `config`.
    pub digest: String,

    /// The resolved configuration itself.
    pub config: EvalConfig,
}

impl ConfigSnapshot {
    /// Seal a resolved configuration.
    pub fn new(config: EvalConfig) -> Result<Self> {
        let digest = digest_of(&config)?;
        Ok(Self {
            resolved: true,
            digest,
            config,
        })
    }

    /// Write the snapshot under `dir` and return its path.
    pub fn write(dir: &Path, config: &EvalConfig) -> Result<PathBuf> {
        let snapshot = Self::new(config.clone())?;
        let path = dir.join(SNAPSHOT_FILE);
        std::fs::write(&path, serde_json::to_vec_pretty(&snapshot)?)?;
        Ok(path)
    }

    /// Load and verify a snapshot.
    ///
    /// Fails with [`EvalError::Config`] when the marker is missing or the
    /// recomputed digest does not match: a worker must not run against a
    /// configuration that was tampered with or only partially written.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)?;
        let snapshot: ConfigSnapshot = serde_json::from_slice(&raw)?;
        if !snapshot.resolved {
            return Err(EvalError::Config(format!(
                "config snapshot {} is missing the resolved marker",
                path.display()
            )));
        }
        let expected = digest_of(&snapshot.config)?;
        if expected != snapshot.digest {
            return Err(EvalError::Config(format!(
                "config snapshot {} digest mismatch: expected {expected}, found {}",
                path.display(),
                snapshot.digest
            )));
        }
        Ok(snapshot)
    }

    /// Detect whether `path` holds a snapshot.
    ///
    /// Returns `Ok(None)` for anything that is not snapshot-shaped (a
    /// plain YAML config, in practice), so the caller can fall back to
    /// the file-merge path.
    pub fn sniff(path: &Path) -> Result<Option<Self>> {
        let raw = std::fs::read_to_string(path)?;
        let Ok(doc) = serde_json::from_str::<serde_json::Value>(&raw) else {
            return Ok(None);
        };
        if doc.get("resolved").is_none() {
            return Ok(None);
        }
        Self::load(path).map(Some)
    }
}

fn digest_of(config: &EvalConfig) -> Result<String> {
    let canonical = serde_json::to_vec(config)?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, ModelConfig, TestConfig};

    fn sample_config() -> EvalConfig {
        EvalConfig {
            test: TestConfig {
                datasets: vec!["coco_2017_val".to_string()],
            },
            model: ModelConfig { num_classes: 81 },
            engine: EngineConfig {
                program: "detect-engine".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_write_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let config = sample_config();
        let path = ConfigSnapshot::write(dir.path(), &config).unwrap();
        let loaded = ConfigSnapshot::load(&path).unwrap();
        assert!(loaded.resolved);
        assert_eq!(loaded.config, config);
    }

    #[test]
    fn test_tampered_payload_fails_the_digest_check() {
        let dir = tempfile::tempdir().unwrap();
        let path = ConfigSnapshot::write(dir.path(), &sample_config()).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let tampered = raw.replace("coco_2017_val", "coco_2017_train");
        std::fs::write(&path, tampered).unwrap();

        let err = ConfigSnapshot::load(&path).unwrap_err();
        assert!(matches!(err, EvalError::Config(_)));
        assert!(err.to_string().contains("digest mismatch"));
    }

    #[test]
    fn test_unmarked_snapshot_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = ConfigSnapshot::write(dir.path(), &sample_config()).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, raw.replace("\"resolved\": true", "\"resolved\": false")).unwrap();

        let err = ConfigSnapshot::load(&path).unwrap_err();
        assert!(err.to_string().contains("resolved marker"));
    }

    #[test]
    fn test_sniff_ignores_plain_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "test:\n  datasets: [x]\n").unwrap();
        assert!(ConfigSnapshot::sniff(&path).unwrap().is_none());
    }

    #[test]
    fn test_sniff_detects_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let path = ConfigSnapshot::write(dir.path(), &sample_config()).unwrap();
        assert!(ConfigSnapshot::sniff(&path).unwrap().is_some());
    }
}
