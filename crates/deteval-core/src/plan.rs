//! Execution-plan validation.
//!
//! Before any inference work starts, the flag combination must describe
//! exactly one unambiguous plan: one weight source, a device count that
//! agrees with the multi-GPU flag, and a concrete output directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::device::DeviceOrdinal;
use crate::error::{EvalError, Result};

/// Trained-parameter source. The two formats are mutually exclusive;
/// their content is the inference engine's concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightSource {
    /// Native training checkpoint.
    Checkpoint(PathBuf),

    /// Legacy Detectron weights file.
    Detectron(PathBuf),
}

impl WeightSource {
    /// Build from the two mutually exclusive CLI flags.
    pub fn from_flags(ckpt: Option<PathBuf>, detectron: Option<PathBuf>) -> Result<Self> {
        match (ckpt, detectron) {
            (Some(path), None) => Ok(Self::Checkpoint(path)),
            (None, Some(path)) => Ok(Self::Detectron(path)),
            (Some(_), Some(_)) => Err(EvalError::Usage(
                "exactly one of --load_ckpt and --load_detectron must be given, not both"
                    .to_string(),
            )),
            (None, None) => Err(EvalError::Usage(
                "one of --load_ckpt or --load_detectron is required".to_string(),
            )),
        }
    }

    /// Path to the weight file.
    pub fn path(&self) -> &Path {
        match self {
            Self::Checkpoint(path) | Self::Detectron(path) => path,
        }
    }

    /// CLI flag spelling used when re-invoking a worker.
    pub fn flag(&self) -> &'static str {
        match self {
            Self::Checkpoint(_) => "--load_ckpt",
            Self::Detectron(_) => "--load_detectron",
        }
    }

    /// Stable name for logs and engine invocations.
    pub fn format_name(&self) -> &'static str {
        match self {
            Self::Checkpoint(_) => "checkpoint",
            Self::Detectron(_) => "detectron",
        }
    }
}

/// Validated, unambiguous execution plan for one run.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub weights: WeightSource,
    pub devices: Vec<DeviceOrdinal>,
    pub multi_gpu: bool,
    pub output_dir: PathBuf,
}

impl ExecutionPlan {
    /// Validate the flag combination against the visible devices and
    /// settle the output directory. Fails fast, before any inference.
    pub fn validate(
        weights: WeightSource,
        devices: Vec<DeviceOrdinal>,
        multi_gpu: bool,
        output_dir: Option<PathBuf>,
    ) -> Result<Self> {
        if devices.is_empty() {
            return Err(EvalError::Environment(
                "no accelerator device visible".to_string(),
            ));
        }
        // Exactly one device XOR multi-GPU testing: anything else runs
        // the wrong code path for the hardware actually present.
        if (devices.len() == 1) == multi_gpu {
            return Err(EvalError::Usage(format!(
                "{} visible device(s) with --multi-gpu-testing {}; a single-device run \
                 must see exactly one device, a multi-device run more than one",
                devices.len(),
                if multi_gpu { "on" } else { "off" }
            )));
        }

        let output_dir = match output_dir {
            Some(dir) => dir,
            None => {
                let derived = derive_output_dir(weights.path())?;
                info!(output_dir = %derived.display(), "automatically set output directory");
                derived
            }
        };
        std::fs::create_dir_all(&output_dir)?;

        Ok(Self {
            weights,
            devices,
            multi_gpu,
            output_dir,
        })
    }
}

/// Derive the output directory from the weight path:
/// `/a/b/ckpt/model.ext` → `/a/b/test`.
fn derive_output_dir(weights: &Path) -> Result<PathBuf> {
    let grandparent = weights.parent().and_then(Path::parent).ok_or_else(|| {
        EvalError::Usage(format!(
            "cannot derive an output directory from weight path {}; pass --output_dir",
            weights.display()
        ))
    })?;
    Ok(grandparent.join("test"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_source_requires_exactly_one_flag() {
        assert!(matches!(
            WeightSource::from_flags(None, None),
            Err(EvalError::Usage(_))
        ));
        assert!(matches!(
            WeightSource::from_flags(
                Some(PathBuf::from("/m/ckpt/a.pt")),
                Some(PathBuf::from("/m/ckpt/b.pkl"))
            ),
            Err(EvalError::Usage(_))
        ));
        assert!(WeightSource::from_flags(Some(PathBuf::from("/m/ckpt/a.pt")), None).is_ok());
        assert!(WeightSource::from_flags(None, Some(PathBuf::from("/m/ckpt/b.pkl"))).is_ok());
    }

    #[test]
    fn test_derive_output_dir_takes_grandparent() {
        let derived = derive_output_dir(Path::new("/a/b/ckpt/model.ext")).unwrap();
        assert_eq!(derived, PathBuf::from("/a/b/test"));
    }

    #[test]
    fn test_derive_output_dir_needs_two_ancestors() {
        assert!(derive_output_dir(Path::new("model.ext")).is_err());
    }

    #[test]
    fn test_single_device_without_multi_gpu_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let plan = ExecutionPlan::validate(
            WeightSource::Checkpoint(PathBuf::from("/m/ckpt/model.pt")),
            vec![DeviceOrdinal(0)],
            false,
            Some(out.clone()),
        )
        .unwrap();
        assert!(!plan.multi_gpu);
        assert!(out.is_dir());
    }

    #[test]
    fn test_single_device_with_multi_gpu_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = ExecutionPlan::validate(
            WeightSource::Checkpoint(PathBuf::from("/m/ckpt/model.pt")),
            vec![DeviceOrdinal(0)],
            true,
            Some(dir.path().join("out")),
        )
        .unwrap_err();
        assert!(matches!(err, EvalError::Usage(_)));
    }

    #[test]
    fn test_many_devices_without_multi_gpu_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = ExecutionPlan::validate(
            WeightSource::Checkpoint(PathBuf::from("/m/ckpt/model.pt")),
            vec![DeviceOrdinal(0), DeviceOrdinal(1)],
            false,
            Some(dir.path().join("out")),
        )
        .unwrap_err();
        assert!(matches!(err, EvalError::Usage(_)));
    }

    #[test]
    fn test_output_dir_creation_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested").join("out");
        for _ in 0..2 {
            ExecutionPlan::validate(
                WeightSource::Detectron(PathBuf::from("/m/ckpt/model.pkl")),
                vec![DeviceOrdinal(0)],
                false,
                Some(out.clone()),
            )
            .unwrap();
        }
        assert!(out.is_dir());
    }

    #[test]
    fn test_derived_output_dir_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let weights = dir.path().join("run1").join("ckpt").join("model.pt");
        std::fs::create_dir_all(weights.parent().unwrap()).unwrap();
        let plan = ExecutionPlan::validate(
            WeightSource::Checkpoint(weights),
            vec![DeviceOrdinal(0)],
            false,
            None,
        )
        .unwrap();
        assert_eq!(plan.output_dir, dir.path().join("run1").join("test"));
        assert!(plan.output_dir.is_dir());
    }
}
