use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};

use crate::tools::{self, ToolContext, ToolOutcome};

const JSONRPC_VERSION: &str = "2.0";
const PROTOCOL_VERSION: &str = "2024-11-05";

const PARSE_ERROR: i64 = -32700;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

/// Serve the tool catalogue over newline-delimited JSON-RPC on stdio.
///
/// Requests are handled strictly one at a time: a request runs to
/// completion before the next line is read. Logging goes to stderr so
/// stdout stays a clean protocol channel.
pub(crate) async fn serve(context: ToolContext) -> anyhow::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut lines = stdin.lines();

    info!("mobiscope tool server listening on stdio");

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(err) => {
                debug!(error = %err, "Discarding unparseable request line");
                write_frame(&mut stdout, &error_frame(Value::Null, PARSE_ERROR, "Parse error"))
                    .await?;
                continue;
            }
        };

        let Some(id) = request.id else {
            // Notifications carry no id and expect no response.
            debug!(method = request.method, "Ignoring notification");
            continue;
        };

        let frame = handle_request(&context, &request.method, &request.params, id).await;
        write_frame(&mut stdout, &frame).await?;
    }

    info!("stdin closed, shutting down");

    Ok(())
}

async fn handle_request(context: &ToolContext, method: &str, params: &Value, id: Value) -> Value {
    match method {
        "initialize" => result_frame(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "serverInfo": {
                    "name": "mobiscope",
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "capabilities": {"tools": {}},
            }),
        ),
        "ping" => result_frame(id, json!({})),
        "tools/list" => {
            let tools: Vec<Value> = tools::catalogue()
                .iter()
                .map(|spec| {
                    json!({
                        "name": spec.name,
                        "description": spec.description,
                        "inputSchema": spec.input_schema,
                    })
                })
                .collect();

            result_frame(id, json!({"tools": tools}))
        }
        "tools/call" => {
            let Some(name) = params.get("name").and_then(Value::as_str) else {
                return error_frame(id, INVALID_PARAMS, "Missing tool name");
            };
            let args = params.get("arguments").cloned().unwrap_or(Value::Null);

            let outcome = tools::dispatch(context, name, &args).await;
            result_frame(id, outcome_to_result(&outcome))
        }
        _ => error_frame(id, METHOD_NOT_FOUND, &format!("Unknown method '{method}'")),
    }
}

fn outcome_to_result(outcome: &ToolOutcome) -> Value {
    json!({
        "content": [{"type": "text", "text": outcome.text}],
        "isError": outcome.is_error,
    })
}

fn result_frame(id: Value, result: Value) -> Value {
    json!({"jsonrpc": JSONRPC_VERSION, "id": id, "result": result})
}

fn error_frame(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "error": {"code": code, "message": message},
    })
}

async fn write_frame(stdout: &mut tokio::io::Stdout, frame: &Value) -> anyhow::Result<()> {
    let mut line = serde_json::to_vec(frame)?;
    line.push(b'\n');
    stdout.write_all(&line).await?;
    stdout.flush().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;
    use crate::license::cache::EntitlementCache;
    use crate::license::validator::RemoteValidator;

    fn offline_context(dir: &tempfile::TempDir) -> ToolContext {
        ToolContext {
            cache: EntitlementCache::new(dir.path().to_path_buf(), "machine-a"),
            validator: RemoteValidator::new(Url::parse("https://127.0.0.1:1/validate").unwrap()),
            license_key: None,
            adb_path: "adb".to_owned(),
        }
    }

    #[tokio::test]
    async fn initialize_reports_the_server_identity() {
        let dir = tempfile::tempdir().unwrap();
        let frame =
            handle_request(&offline_context(&dir), "initialize", &Value::Null, json!(1)).await;

        assert_eq!(frame["jsonrpc"], "2.0");
        assert_eq!(frame["id"], 1);
        assert_eq!(frame["result"]["serverInfo"]["name"], "mobiscope");
    }

    #[tokio::test]
    async fn tools_list_exposes_the_full_catalogue() {
        let dir = tempfile::tempdir().unwrap();
        let frame =
            handle_request(&offline_context(&dir), "tools/list", &Value::Null, json!(2)).await;

        let listed = frame["result"]["tools"].as_array().unwrap();
        assert_eq!(listed.len(), tools::catalogue().len());
        assert!(listed.iter().all(|tool| tool["inputSchema"].is_object()));
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let frame =
            handle_request(&offline_context(&dir), "resources/list", &Value::Null, json!(3)).await;

        assert_eq!(frame["error"]["code"], METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn tool_call_without_a_name_is_invalid_params() {
        let dir = tempfile::tempdir().unwrap();
        let frame = handle_request(
            &offline_context(&dir),
            "tools/call",
            &json!({"arguments": {}}),
            json!(4),
        )
        .await;

        assert_eq!(frame["error"]["code"], INVALID_PARAMS);
    }

    #[tokio::test]
    async fn denied_tool_call_is_a_result_frame_not_an_error_frame() {
        let dir = tempfile::tempdir().unwrap();
        let frame = handle_request(
            &offline_context(&dir),
            "tools/call",
            &json!({"name": "mobile_take_screenshot"}),
            json!(5),
        )
        .await;

        assert!(frame.get("error").is_none());
        assert_eq!(frame["result"]["isError"], false);
        let text = frame["result"]["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("Advanced license"));
    }
}
