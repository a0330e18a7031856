use anyhow::Context as _;
use serde::Serialize;

use super::{DeviceEntry, DeviceKind, run_for_text, run_with_timeout};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AndroidDeviceInfo {
    pub(crate) serial: String,
    pub(crate) model: Option<String>,
    pub(crate) manufacturer: Option<String>,
    pub(crate) android_version: Option<String>,
    pub(crate) sdk_level: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AndroidAppInfo {
    pub(crate) package: String,
    pub(crate) version_name: Option<String>,
    pub(crate) version_code: Option<String>,
    pub(crate) first_install_time: Option<String>,
    pub(crate) last_update_time: Option<String>,
}

pub(crate) async fn list_devices(adb_path: &str) -> anyhow::Result<Vec<DeviceEntry>> {
    let output = run_for_text(adb_path, &["devices", "-l"]).await?;
    Ok(parse_device_list(&output))
}

fn parse_device_list(output: &str) -> Vec<DeviceEntry> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let serial = fields.next()?;
            // The header line and offline/unauthorized devices never carry
            // the plain "device" state.
            if fields.next()? != "device" {
                return None;
            }

            let model = fields
                .find_map(|field| field.strip_prefix("model:"))
                .unwrap_or(serial);

            Some(DeviceEntry {
                id: serial.to_owned(),
                kind: DeviceKind::Android,
                name: model.replace('_', " "),
            })
        })
        .collect()
}

/// Fetch a fresh accessibility dump. The payload is handed to the parser
/// as-is; uiautomator's trailing status line is clipped when the XML end
/// tag is present.
pub(crate) async fn ui_dump(adb_path: &str, serial: &str) -> anyhow::Result<String> {
    let raw = run_for_text(
        adb_path,
        &["-s", serial, "exec-out", "uiautomator", "dump", "/dev/tty"],
    )
    .await?;

    Ok(match raw.rfind("</hierarchy>") {
        Some(end) => raw[..end + "</hierarchy>".len()].to_owned(),
        None => raw,
    })
}

pub(crate) async fn logcat(adb_path: &str, serial: &str) -> anyhow::Result<String> {
    run_for_text(adb_path, &["-s", serial, "logcat", "-d"]).await
}

pub(crate) async fn screenshot(adb_path: &str, serial: &str) -> anyhow::Result<Vec<u8>> {
    run_with_timeout(adb_path, &["-s", serial, "exec-out", "screencap", "-p"]).await
}

pub(crate) async fn screen_size(adb_path: &str, serial: &str) -> anyhow::Result<(u32, u32)> {
    let output = run_for_text(adb_path, &["-s", serial, "shell", "wm", "size"]).await?;
    parse_screen_size(&output).context("Could not parse `wm size` output")
}

fn parse_screen_size(output: &str) -> Option<(u32, u32)> {
    // An override size, when set, is what the UI actually renders at.
    let line = output
        .lines()
        .find(|line| line.contains("Override size:"))
        .or_else(|| output.lines().find(|line| line.contains("Physical size:")))?;

    let dims = line.rsplit(':').next()?.trim();
    let (width, height) = dims.split_once('x')?;

    Some((width.trim().parse().ok()?, height.trim().parse().ok()?))
}

pub(crate) async fn list_packages(adb_path: &str, serial: &str) -> anyhow::Result<Vec<String>> {
    let output = run_for_text(adb_path, &["-s", serial, "shell", "pm", "list", "packages"]).await?;

    let mut packages: Vec<String> = output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("package:"))
        .map(str::to_owned)
        .collect();
    packages.sort();

    Ok(packages)
}

pub(crate) async fn device_info(adb_path: &str, serial: &str) -> anyhow::Result<AndroidDeviceInfo> {
    let output = run_for_text(adb_path, &["-s", serial, "shell", "getprop"]).await?;

    Ok(AndroidDeviceInfo {
        serial: serial.to_owned(),
        model: getprop_value(&output, "ro.product.model"),
        manufacturer: getprop_value(&output, "ro.product.manufacturer"),
        android_version: getprop_value(&output, "ro.build.version.release"),
        sdk_level: getprop_value(&output, "ro.build.version.sdk"),
    })
}

fn getprop_value(output: &str, key: &str) -> Option<String> {
    let prefix = format!("[{key}]: [");
    output.lines().find_map(|line| {
        line.trim()
            .strip_prefix(&prefix)?
            .strip_suffix(']')
            .map(str::to_owned)
    })
}

pub(crate) async fn app_info(
    adb_path: &str,
    serial: &str,
    package: &str,
) -> anyhow::Result<AndroidAppInfo> {
    let output = run_for_text(
        adb_path,
        &["-s", serial, "shell", "dumpsys", "package", package],
    )
    .await?;

    anyhow::ensure!(
        output.contains("Package ["),
        "Package '{package}' is not installed"
    );

    Ok(AndroidAppInfo {
        package: package.to_owned(),
        version_name: dumpsys_value(&output, "versionName"),
        version_code: dumpsys_value(&output, "versionCode")
            .map(|value| value.split_whitespace().next().unwrap_or(&value).to_owned()),
        first_install_time: dumpsys_value(&output, "firstInstallTime"),
        last_update_time: dumpsys_value(&output, "lastUpdateTime"),
    })
}

fn dumpsys_value(output: &str, key: &str) -> Option<String> {
    let prefix = format!("{key}=");
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix(&prefix))
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_list_skips_header_and_non_ready_devices() {
        let output = "List of devices attached\n\
            emulator-5554          device product:sdk_gphone64 model:sdk_gphone64_x86_64 device:emu64x\n\
            0123456789ABCDEF       unauthorized\n\
            192.168.1.20:5555      offline\n";

        let devices = parse_device_list(output);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "emulator-5554");
        assert_eq!(devices[0].name, "sdk gphone64 x86 64");
        assert_eq!(devices[0].kind, DeviceKind::Android);
    }

    #[test]
    fn screen_size_prefers_the_override_value() {
        let output = "Physical size: 1080x2400\nOverride size: 720x1600\n";
        assert_eq!(parse_screen_size(output), Some((720, 1600)));

        assert_eq!(
            parse_screen_size("Physical size: 1080x2400\n"),
            Some((1080, 2400))
        );
        assert_eq!(parse_screen_size("garbage"), None);
    }

    #[test]
    fn getprop_values_are_extracted_by_key() {
        let output = "[ro.product.model]: [Pixel 8]\n[ro.build.version.sdk]: [34]\n";
        assert_eq!(
            getprop_value(output, "ro.product.model").as_deref(),
            Some("Pixel 8")
        );
        assert_eq!(getprop_value(output, "ro.missing"), None);
    }

    #[test]
    fn dumpsys_fields_are_extracted_by_key() {
        let output = "  Package [com.example.app] (abc123):\n    versionCode=42 minSdk=26 targetSdk=34\n    versionName=1.2.3\n    firstInstallTime=2025-11-02 10:21:00\n";

        assert_eq!(dumpsys_value(output, "versionName").as_deref(), Some("1.2.3"));
        assert_eq!(
            dumpsys_value(output, "firstInstallTime").as_deref(),
            Some("2025-11-02 10:21:00")
        );
        assert_eq!(dumpsys_value(output, "missing"), None);
    }
}
