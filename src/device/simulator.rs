use std::collections::HashMap;

use anyhow::{Context as _, anyhow};
use serde::Deserialize;

use super::{DeviceEntry, DeviceKind, run_with_timeout};

#[derive(Debug, Deserialize)]
struct SimctlList {
    devices: HashMap<String, Vec<SimctlDevice>>,
}

#[derive(Debug, Deserialize)]
struct SimctlDevice {
    udid: String,
    name: String,
    state: String,
}

/// Booted iOS simulators, keyed by UDID. On non-macOS hosts this is
/// simply empty.
pub(crate) async fn list_booted() -> anyhow::Result<Vec<DeviceEntry>> {
    if !cfg!(target_os = "macos") {
        return Ok(Vec::new());
    }

    let output = run_with_timeout("xcrun", &["simctl", "list", "devices", "--json"]).await?;
    let parsed: SimctlList =
        serde_json::from_slice(&output).context("Failed to parse `simctl list` output")?;

    Ok(parsed
        .devices
        .into_values()
        .flatten()
        .filter(|device| device.state == "Booted")
        .map(|device| DeviceEntry {
            id: device.udid,
            kind: DeviceKind::Simulator,
            name: device.name,
        })
        .collect())
}

pub(crate) async fn screenshot(udid: &str) -> anyhow::Result<Vec<u8>> {
    // simctl writes to a file path, not to stdout, so go through a
    // temporary file.
    let path = std::env::temp_dir().join(format!("mobiscope-screenshot-{}.png", std::process::id()));
    let path_str = path.to_string_lossy().into_owned();

    run_with_timeout("xcrun", &["simctl", "io", udid, "screenshot", &path_str]).await?;

    let bytes = std::fs::read(&path)
        .with_context(|| format!("Failed to read screenshot from '{}'", path.display()))?;
    let _ = std::fs::remove_file(&path);

    Ok(bytes)
}

/// Operations that need an accessibility driver the simulator backend
/// does not ship with.
pub(crate) fn unsupported(operation: &str) -> anyhow::Error {
    anyhow!("{operation} is not available for iOS simulators; target an Android device or emulator")
}
