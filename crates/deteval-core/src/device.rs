//! Accelerator device discovery.
//!
//! The orchestrator needs exactly one piece of information from the
//! hardware: which device ordinals are visible to this process. Workers
//! are pinned to a single ordinal through `CUDA_VISIBLE_DEVICES`, so the
//! same discovery path serves both the parent and its children.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EvalError, Result};

/// Environment variable restricting device visibility, honored by the
/// CUDA runtime and by every worker this orchestrator spawns.
pub const VISIBLE_DEVICES_ENV: &str = "CUDA_VISIBLE_DEVICES";

/// Zero-based ordinal of a visible accelerator device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceOrdinal(pub usize);

impl std::fmt::Display for DeviceOrdinal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Enumerate the accelerator ordinals visible to this process.
///
/// `CUDA_VISIBLE_DEVICES` takes precedence when set (comma-separated
/// ordinals). Otherwise the `/dev/nvidia*` device nodes are probed.
/// An empty result is an [`EvalError::Environment`]: running without an
/// accelerator is a hard precondition failure, checked once at startup.
pub fn visible_devices() -> Result<Vec<DeviceOrdinal>> {
    if let Ok(raw) = std::env::var(VISIBLE_DEVICES_ENV) {
        return parse_visible_spec(&raw);
    }
    probe_device_nodes("/dev")
}

/// Parse a `CUDA_VISIBLE_DEVICES`-style comma list.
pub fn parse_visible_spec(raw: &str) -> Result<Vec<DeviceOrdinal>> {
    let mut devices = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let ordinal: usize = part.parse().map_err(|_| {
            EvalError::Environment(format!(
                "{VISIBLE_DEVICES_ENV} entry '{part}' is not a device ordinal"
            ))
        })?;
        devices.push(DeviceOrdinal(ordinal));
    }
    if devices.is_empty() {
        return Err(EvalError::Environment(format!(
            "{VISIBLE_DEVICES_ENV} is set but names no usable device"
        )));
    }
    Ok(devices)
}

fn probe_device_nodes(dev_root: &str) -> Result<Vec<DeviceOrdinal>> {
    let mut devices = Vec::new();
    // Device nodes are dense from zero; 64 is far above any real host.
    for ordinal in 0..64 {
        if Path::new(dev_root).join(format!("nvidia{ordinal}")).exists() {
            devices.push(DeviceOrdinal(ordinal));
        }
    }
    if devices.is_empty() {
        return Err(EvalError::Environment(
            "no CUDA device visible; a compatible accelerator is required".to_string(),
        ));
    }
    Ok(devices)
}
