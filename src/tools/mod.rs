use std::time::Duration;

use anyhow::Context as _;
use base64::prelude::*;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::device::{self, DeviceEntry, DeviceKind, android, simulator};
use crate::license::{
    self,
    cache::EntitlementCache,
    policy::{self, TierLimits},
    validator::RemoteValidator,
};
use crate::ui::{
    matcher::{self, ElementCriteria},
    parser,
    wait::{self, DumpSource},
};

const UPGRADE_MESSAGE: &str = "This tool requires a MobiScope Advanced license. \
    Your current license tier is free. Upgrade at https://mobiscope.dev/upgrade \
    or activate an existing key with `mobiscope license activate <key>`.";

/// One entry of the tool catalogue: unique name, tier classification, and
/// a typed parameter schema for the protocol listing.
pub(crate) struct ToolSpec {
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
    pub(crate) input_schema: Value,
}

/// Everything the dispatcher needs to serve requests, wired up once at
/// startup and passed explicitly.
pub(crate) struct ToolContext {
    pub(crate) cache: EntitlementCache,
    pub(crate) validator: RemoteValidator,
    pub(crate) license_key: Option<String>,
    pub(crate) adb_path: String,
}

/// Result of one tool invocation. Access denial and empty search results
/// are ordinary successful outcomes distinguishable by content; only
/// operation failures (device errors, bad input) set `is_error`.
#[derive(Debug)]
pub(crate) struct ToolOutcome {
    pub(crate) text: String,
    pub(crate) is_error: bool,
}

impl ToolOutcome {
    fn success(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    fn failure(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }
}

fn device_arg_schema() -> Value {
    json!({
        "device": {
            "type": "string",
            "description": "Device id (adb serial or simulator UDID); optional when exactly one device is connected"
        }
    })
}

fn criteria_schema() -> Value {
    json!({
        "text": {"type": "string", "description": "Case-insensitive substring of the element text"},
        "resourceId": {"type": "string", "description": "Case-sensitive substring of the resource id"},
        "accessibilityLabel": {"type": "string", "description": "Case-insensitive substring of the accessibility label"},
        "className": {"type": "string", "description": "Case-sensitive substring of the class name"}
    })
}

fn object_schema(mut properties: serde_json::Map<String, Value>, extra: Value) -> Value {
    if let Value::Object(extra) = extra {
        properties.extend(extra);
    }
    json!({"type": "object", "properties": properties})
}

pub(crate) fn catalogue() -> Vec<ToolSpec> {
    let device_only = || {
        object_schema(serde_json::Map::new(), device_arg_schema())
    };
    let device_and_criteria = || {
        let mut properties = serde_json::Map::new();
        if let Value::Object(criteria) = criteria_schema() {
            properties.extend(criteria);
        }
        object_schema(properties, device_arg_schema())
    };

    vec![
        ToolSpec {
            name: "mobile_list_devices",
            description: "List connected Android devices/emulators and booted iOS simulators",
            input_schema: json!({"type": "object", "properties": {}}),
        },
        ToolSpec {
            name: "mobile_get_device_info",
            description: "Basic hardware and OS information for a device",
            input_schema: device_only(),
        },
        ToolSpec {
            name: "mobile_get_screen_size",
            description: "Screen dimensions in pixels",
            input_schema: device_only(),
        },
        ToolSpec {
            name: "mobile_list_apps",
            description: "Installed package names on a device",
            input_schema: device_only(),
        },
        ToolSpec {
            name: "mobile_list_elements_on_screen",
            description: "All UI elements currently on screen, optionally filtered by search criteria",
            input_schema: device_and_criteria(),
        },
        ToolSpec {
            name: "mobile_find_element",
            description: "First on-screen element matching the search criteria, in document order",
            input_schema: device_and_criteria(),
        },
        ToolSpec {
            name: "mobile_get_logs",
            description: "Recent device log lines (clipped to the license tier's line limit)",
            input_schema: {
                let mut properties = serde_json::Map::new();
                properties.insert(
                    "lines".to_owned(),
                    json!({"type": "integer", "description": "Number of trailing log lines to return"}),
                );
                object_schema(properties, device_arg_schema())
            },
        },
        ToolSpec {
            name: "mobile_wait_for_element",
            description: "Poll the screen until an element matching the criteria appears or the timeout elapses",
            input_schema: {
                let mut properties = serde_json::Map::new();
                if let Value::Object(criteria) = criteria_schema() {
                    properties.extend(criteria);
                }
                properties.insert(
                    "timeoutMs".to_owned(),
                    json!({"type": "integer", "description": "How long to wait, in milliseconds (clamped server-side)"}),
                );
                object_schema(properties, device_arg_schema())
            },
        },
        ToolSpec {
            name: "mobile_assert_element",
            description: "Assert that an element matching the criteria is (or is not) on screen",
            input_schema: {
                let mut properties = serde_json::Map::new();
                if let Value::Object(criteria) = criteria_schema() {
                    properties.extend(criteria);
                }
                properties.insert(
                    "expected".to_owned(),
                    json!({"type": "boolean", "description": "Whether the element is expected to be present (default true)"}),
                );
                object_schema(properties, device_arg_schema())
            },
        },
        ToolSpec {
            name: "mobile_take_screenshot",
            description: "Capture the current screen as a base64-encoded PNG",
            input_schema: device_only(),
        },
        ToolSpec {
            name: "mobile_get_app_info",
            description: "Version and install metadata for an installed package",
            input_schema: {
                let mut properties = serde_json::Map::new();
                properties.insert(
                    "package".to_owned(),
                    json!({"type": "string", "description": "Package name, e.g. com.example.app"}),
                );
                object_schema(properties, device_arg_schema())
            },
        },
    ]
}

/// Route one tool call: resolve the caller's tier, check access, then run
/// the handler under that tier's limits. Nothing on this path is fatal to
/// the process; every failure resolves to a deny, a free-tier fallback,
/// or an operation-level error result.
#[instrument(skip(context, args), fields(tool = name))]
pub(crate) async fn dispatch(context: &ToolContext, name: &str, args: &Value) -> ToolOutcome {
    let tier = license::resolve_tier(
        &context.cache,
        &context.validator,
        context.license_key.as_deref(),
    )
    .await;

    if !policy::can_access(name, tier) {
        if policy::tool_tier(name).is_none() {
            return ToolOutcome::failure(format!("Unknown tool '{name}'"));
        }

        debug!(%tier, "Tool requires a higher license tier");
        return ToolOutcome::success(UPGRADE_MESSAGE);
    }

    let limits = TierLimits::for_tier(tier);
    match run_tool(context, name, args, limits).await {
        Ok(outcome) => outcome,
        Err(err) => ToolOutcome::failure(format!("{err:#}")),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceArgs {
    #[serde(default)]
    device: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchArgs {
    #[serde(default)]
    device: Option<String>,
    #[serde(flatten)]
    criteria: ElementCriteria,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogArgs {
    #[serde(default)]
    device: Option<String>,
    #[serde(default)]
    lines: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WaitArgs {
    #[serde(default)]
    device: Option<String>,
    #[serde(flatten)]
    criteria: ElementCriteria,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssertArgs {
    #[serde(default)]
    device: Option<String>,
    #[serde(flatten)]
    criteria: ElementCriteria,
    #[serde(default)]
    expected: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppInfoArgs {
    #[serde(default)]
    device: Option<String>,
    package: String,
}

fn parse_args<T: serde::de::DeserializeOwned>(args: &Value) -> anyhow::Result<T> {
    let value = if args.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        args.clone()
    };

    serde_json::from_value(value).context("Invalid tool arguments")
}

async fn run_tool(
    context: &ToolContext,
    name: &str,
    args: &Value,
    limits: TierLimits,
) -> anyhow::Result<ToolOutcome> {
    match name {
        "mobile_list_devices" => list_devices(context, limits).await,
        "mobile_get_device_info" => device_info(context, parse_args(args)?).await,
        "mobile_get_screen_size" => screen_size(context, parse_args(args)?).await,
        "mobile_list_apps" => list_apps(context, parse_args(args)?).await,
        "mobile_list_elements_on_screen" => list_elements(context, parse_args(args)?).await,
        "mobile_find_element" => find_element(context, parse_args(args)?).await,
        "mobile_get_logs" => get_logs(context, parse_args(args)?, limits).await,
        "mobile_wait_for_element" => wait_for_element(context, parse_args(args)?).await,
        "mobile_assert_element" => assert_element(context, parse_args(args)?).await,
        "mobile_take_screenshot" => take_screenshot(context, parse_args(args)?).await,
        "mobile_get_app_info" => app_info(context, parse_args(args)?).await,
        _ => anyhow::bail!("Unknown tool '{name}'"),
    }
}

/// Resolve the target device and require the Android backend for
/// operations the simulator cannot serve.
async fn select_android(
    context: &ToolContext,
    requested: Option<&str>,
    operation: &str,
) -> anyhow::Result<DeviceEntry> {
    let entry = device::select(&context.adb_path, requested).await?;
    match entry.kind {
        DeviceKind::Android => Ok(entry),
        DeviceKind::Simulator => Err(simulator::unsupported(operation)),
    }
}

async fn list_devices(context: &ToolContext, limits: TierLimits) -> anyhow::Result<ToolOutcome> {
    let devices = device::enumerate(&context.adb_path).await;
    let total = devices.len();
    let shown: Vec<&DeviceEntry> = devices.iter().take(limits.max_devices).collect();

    let mut text = serde_json::to_string_pretty(&shown)?;
    if total > shown.len() {
        text.push_str(&format!(
            "\n{} more device(s) hidden by the current license tier (limit {}).",
            total - shown.len(),
            limits.max_devices
        ));
    }

    Ok(ToolOutcome::success(text))
}

async fn device_info(context: &ToolContext, args: DeviceArgs) -> anyhow::Result<ToolOutcome> {
    let entry = device::select(&context.adb_path, args.device.as_deref()).await?;

    let info = match entry.kind {
        DeviceKind::Android => {
            serde_json::to_value(android::device_info(&context.adb_path, &entry.id).await?)?
        }
        DeviceKind::Simulator => serde_json::to_value(&entry)?,
    };

    Ok(ToolOutcome::success(serde_json::to_string_pretty(&info)?))
}

async fn screen_size(context: &ToolContext, args: DeviceArgs) -> anyhow::Result<ToolOutcome> {
    let entry = select_android(context, args.device.as_deref(), "Screen size lookup").await?;
    let (width, height) = android::screen_size(&context.adb_path, &entry.id).await?;

    Ok(ToolOutcome::success(
        json!({"width": width, "height": height}).to_string(),
    ))
}

async fn list_apps(context: &ToolContext, args: DeviceArgs) -> anyhow::Result<ToolOutcome> {
    let entry = select_android(context, args.device.as_deref(), "App listing").await?;
    let packages = android::list_packages(&context.adb_path, &entry.id).await?;

    Ok(ToolOutcome::success(serde_json::to_string_pretty(&packages)?))
}

async fn list_elements(context: &ToolContext, args: SearchArgs) -> anyhow::Result<ToolOutcome> {
    let entry = select_android(context, args.device.as_deref(), "UI element listing").await?;
    let dump = android::ui_dump(&context.adb_path, &entry.id).await?;
    let elements = parser::parse_dump(&dump)?;

    let text = if args.criteria.is_empty() {
        serde_json::to_string_pretty(&elements)?
    } else {
        args.criteria.validate()?;
        serde_json::to_string_pretty(&matcher::find_all(&elements, &args.criteria))?
    };

    Ok(ToolOutcome::success(text))
}

async fn find_element(context: &ToolContext, args: SearchArgs) -> anyhow::Result<ToolOutcome> {
    args.criteria.validate()?;

    let entry = select_android(context, args.device.as_deref(), "Element lookup").await?;
    let dump = android::ui_dump(&context.adb_path, &entry.id).await?;
    let elements = parser::parse_dump(&dump)?;

    Ok(match matcher::find_first(&elements, &args.criteria) {
        Some(element) => ToolOutcome::success(serde_json::to_string_pretty(element)?),
        None => ToolOutcome::success("No matching element found on screen."),
    })
}

async fn get_logs(
    context: &ToolContext,
    args: LogArgs,
    limits: TierLimits,
) -> anyhow::Result<ToolOutcome> {
    let entry = select_android(context, args.device.as_deref(), "Log retrieval").await?;
    let logs = android::logcat(&context.adb_path, &entry.id).await?;

    let max = args
        .lines
        .map_or(limits.max_log_lines, |requested| {
            requested.min(limits.max_log_lines)
        });

    Ok(ToolOutcome::success(clip_last_lines(&logs, max)))
}

struct AdbDumpSource<'a> {
    adb_path: &'a str,
    serial: &'a str,
}

impl DumpSource for AdbDumpSource<'_> {
    async fn acquire(&self) -> anyhow::Result<String> {
        android::ui_dump(self.adb_path, self.serial).await
    }
}

async fn wait_for_element(context: &ToolContext, args: WaitArgs) -> anyhow::Result<ToolOutcome> {
    args.criteria.validate()?;

    let entry = select_android(context, args.device.as_deref(), "Waiting for an element").await?;
    let requested = Duration::from_millis(args.timeout_ms.unwrap_or(5000));
    let source = AdbDumpSource {
        adb_path: &context.adb_path,
        serial: &entry.id,
    };

    let outcome = wait::wait_for(&source, &args.criteria, requested).await;
    let elapsed_ms = outcome.elapsed.as_millis();

    Ok(match outcome.element {
        Some(element) => ToolOutcome::success(format!(
            "Element appeared after {elapsed_ms} ms ({} poll(s)):\n{}",
            outcome.polls,
            serde_json::to_string_pretty(&element)?
        )),
        None => ToolOutcome::success(format!(
            "No matching element appeared within {elapsed_ms} ms ({} poll(s)).",
            outcome.polls
        )),
    })
}

async fn assert_element(context: &ToolContext, args: AssertArgs) -> anyhow::Result<ToolOutcome> {
    args.criteria.validate()?;

    let entry = select_android(context, args.device.as_deref(), "Element assertion").await?;
    let dump = android::ui_dump(&context.adb_path, &entry.id).await?;
    let elements = parser::parse_dump(&dump)?;

    let found = matcher::find_first(&elements, &args.criteria);
    let expected = args.expected.unwrap_or(true);

    Ok(match (found, expected) {
        (Some(element), true) => ToolOutcome::success(format!(
            "Assertion passed: element is on screen.\n{}",
            serde_json::to_string_pretty(element)?
        )),
        (None, false) => {
            ToolOutcome::success("Assertion passed: no matching element is on screen.")
        }
        (Some(element), false) => ToolOutcome::failure(format!(
            "Assertion failed: a matching element is on screen.\n{}",
            serde_json::to_string_pretty(element)?
        )),
        (None, true) => {
            ToolOutcome::failure("Assertion failed: no matching element is on screen.")
        }
    })
}

async fn take_screenshot(context: &ToolContext, args: DeviceArgs) -> anyhow::Result<ToolOutcome> {
    let entry = device::select(&context.adb_path, args.device.as_deref()).await?;

    let png = match entry.kind {
        DeviceKind::Android => android::screenshot(&context.adb_path, &entry.id).await?,
        DeviceKind::Simulator => simulator::screenshot(&entry.id).await?,
    };

    Ok(ToolOutcome::success(
        json!({
            "format": "png",
            "device": entry.id,
            "base64": BASE64_STANDARD.encode(&png),
        })
        .to_string(),
    ))
}

async fn app_info(context: &ToolContext, args: AppInfoArgs) -> anyhow::Result<ToolOutcome> {
    let entry = select_android(context, args.device.as_deref(), "App info lookup").await?;
    let info = android::app_info(&context.adb_path, &entry.id, &args.package).await?;

    Ok(ToolOutcome::success(serde_json::to_string_pretty(&info)?))
}

fn clip_last_lines(text: &str, max: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(max);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;
    use crate::license::policy::Tier;

    fn offline_context(dir: &tempfile::TempDir) -> ToolContext {
        ToolContext {
            cache: EntitlementCache::new(dir.path().to_path_buf(), "machine-a"),
            validator: RemoteValidator::new(Url::parse("https://127.0.0.1:1/validate").unwrap()),
            license_key: None,
            adb_path: "adb".to_owned(),
        }
    }

    #[test]
    fn catalogue_names_are_unique_and_classified_by_the_policy() {
        let specs = catalogue();

        let mut names: Vec<&str> = specs.iter().map(|spec| spec.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), specs.len(), "duplicate tool name");

        for spec in &specs {
            assert!(
                policy::tool_tier(spec.name).is_some(),
                "{} missing from the access policy",
                spec.name
            );
            assert!(spec.input_schema.get("type").is_some());
        }

        // Every policy entry is also served.
        for tool in policy::FREE_TOOLS.iter().chain(policy::ADVANCED_ONLY_TOOLS) {
            assert!(
                specs.iter().any(|spec| spec.name == *tool),
                "{tool} not in the catalogue"
            );
        }
    }

    #[test]
    fn clip_keeps_the_last_lines() {
        let text = "one\ntwo\nthree\nfour";
        assert_eq!(clip_last_lines(text, 2), "three\nfour");
        assert_eq!(clip_last_lines(text, 10), text);
        assert_eq!(clip_last_lines(text, 0), "");
    }

    #[tokio::test]
    async fn advanced_tool_on_free_tier_returns_an_upgrade_message() {
        let dir = tempfile::tempdir().unwrap();
        let context = offline_context(&dir);

        let outcome = dispatch(&context, "mobile_wait_for_element", &Value::Null).await;
        assert!(!outcome.is_error, "denial is a normal result, not an error");
        assert!(outcome.text.contains("Advanced license"));
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_result() {
        let dir = tempfile::tempdir().unwrap();
        let context = offline_context(&dir);

        let outcome = dispatch(&context, "mobile_tap", &Value::Null).await;
        assert!(outcome.is_error);
        assert!(outcome.text.contains("Unknown tool"));
    }

    #[tokio::test]
    async fn free_search_tool_rejects_empty_criteria_as_operation_error() {
        let dir = tempfile::tempdir().unwrap();
        let context = offline_context(&dir);

        let outcome = dispatch(&context, "mobile_find_element", &Value::Null).await;
        assert!(outcome.is_error);
        assert!(outcome.text.contains("criterion"));
    }

    #[test]
    fn denied_free_tier_cannot_reach_any_advanced_tool() {
        for tool in policy::ADVANCED_ONLY_TOOLS {
            assert!(!policy::can_access(tool, Tier::Free));
        }
    }
}
