pub(crate) mod android;
pub(crate) mod simulator;

use std::time::Duration;

use anyhow::{anyhow, bail};
use serde::Serialize;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

pub(crate) const DEVICE_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum DeviceKind {
    Android,
    Simulator,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DeviceEntry {
    pub(crate) id: String,
    pub(crate) kind: DeviceKind,
    pub(crate) name: String,
}

/// Run a device command, capturing stdout. The command is an opaque
/// producer of text or bytes; a non-zero exit or a blown deadline becomes
/// an operation-level error with a human-readable cause.
pub(crate) async fn run_with_timeout(program: &str, args: &[&str]) -> anyhow::Result<Vec<u8>> {
    debug!(program, ?args, "Running device command");

    let output = match timeout(
        DEVICE_COMMAND_TIMEOUT,
        Command::new(program).args(args).kill_on_drop(true).output(),
    )
    .await
    {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => {
            return Err(anyhow!(err).context(format!("Failed to run `{program}`")));
        }
        Err(_) => bail!("`{program}` did not complete within {DEVICE_COMMAND_TIMEOUT:?}"),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "`{program} {}` failed ({}): {}",
            args.join(" "),
            output.status,
            stderr.trim()
        );
    }

    Ok(output.stdout)
}

pub(crate) async fn run_for_text(program: &str, args: &[&str]) -> anyhow::Result<String> {
    let stdout = run_with_timeout(program, args).await?;
    Ok(String::from_utf8_lossy(&stdout).into_owned())
}

/// Enumerate devices across backends. A failing backend contributes
/// nothing rather than failing the whole enumeration.
pub(crate) async fn enumerate(adb_path: &str) -> Vec<DeviceEntry> {
    let mut devices = Vec::new();

    match android::list_devices(adb_path).await {
        Ok(found) => devices.extend(found),
        Err(err) => {
            debug!(error = %format!("{err:#}"), "Android device enumeration failed");
        }
    }

    match simulator::list_booted().await {
        Ok(found) => devices.extend(found),
        Err(err) => {
            debug!(error = %format!("{err:#}"), "Simulator enumeration failed");
        }
    }

    devices
}

/// Pick the target device for an operation: the explicitly requested one,
/// or the single connected device.
pub(crate) async fn select(
    adb_path: &str,
    requested: Option<&str>,
) -> anyhow::Result<DeviceEntry> {
    let devices = enumerate(adb_path).await;

    if let Some(id) = requested {
        return devices
            .into_iter()
            .find(|device| device.id == id)
            .ok_or_else(|| anyhow!("No connected device with id '{id}'"));
    }

    let count = devices.len();
    let mut devices = devices.into_iter();
    match (devices.next(), devices.next()) {
        (Some(device), None) => Ok(device),
        (None, _) => bail!("No connected devices found"),
        (Some(_), Some(_)) => {
            bail!("{count} devices connected, specify one with the `device` argument")
        }
    }
}
