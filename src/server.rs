//! JSON-RPC 2.0 over stdio, one message per line.

use crate::resources::{read_resource, resources_list};
use crate::toolbox::{tools_list, Toolbox};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

pub const PROTOCOL_VERSION: &str = "2025-06-18";
pub const SERVER_NAME: &str = "toolbox-mcp";

/// Notification that ends the serve loop
fn is_exit(msg: &Value) -> bool {
    msg.get("id").is_none() && msg.get("method").and_then(Value::as_str) == Some("exit")
}

/// Handle one decoded message. Notifications yield `None`.
pub async fn handle_message(toolbox: &Toolbox, msg: Value) -> Option<Value> {
    let method = msg.get("method").and_then(|m| m.as_str()).unwrap_or("");
    let id = msg.get("id").cloned();
    let params = msg.get("params").cloned().unwrap_or_else(|| json!({}));

    if id.is_none() {
        debug!("notification: {}", method);
        return None;
    }

    let result = match method {
        "initialize" => Ok(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "serverInfo": {
                "name": SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION")
            },
            "capabilities": {
                "tools": { "listChanged": false },
                "resources": { "listChanged": false },
                "prompts": { "listChanged": false }
            }
        })),
        "ping" => Ok(json!({})),
        "tools/list" => Ok(json!({ "tools": tools_list() })),
        "tools/call" => Ok(call_tool(toolbox, &params).await),
        "resources/list" => Ok(json!({ "resources": resources_list() })),
        "resources/read" => {
            let uri = params.get("uri").and_then(|v| v.as_str()).unwrap_or("");
            read_resource(uri).ok_or_else(|| {
                json!({
                    "code": -32602,
                    "message": format!("Unknown resource: {}", uri)
                })
            })
        }
        "prompts/list" => Ok(json!({ "prompts": [] })),
        _ => Err(json!({
            "code": -32601,
            "message": format!("Method not found: {}", method)
        })),
    };

    Some(match result {
        Ok(v) => json!({ "jsonrpc": "2.0", "result": v, "id": id }),
        Err(err_obj) => json!({ "jsonrpc": "2.0", "error": err_obj, "id": id }),
    })
}

async fn call_tool(toolbox: &Toolbox, params: &Value) -> Value {
    let name = params.get("name").and_then(|v| v.as_str()).unwrap_or("");
    let args = params
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| json!({}));
    toolbox.call_tool(name, &args).await.into_call_result()
}

/// Read requests from `reader` until EOF or `exit`, writing responses to `writer`
pub async fn serve<R, W>(toolbox: &Toolbox, reader: R, mut writer: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parsed: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                warn!("invalid json-rpc line: {} | err={}", line, e);
                continue;
            }
        };

        if is_exit(&parsed) {
            info!("exit notification received");
            break;
        }

        if let Some(resp) = handle_message(toolbox, parsed).await {
            let s = serde_json::to_string(&resp)?;
            writer.write_all(s.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
    }

    Ok(())
}

/// Serve on the process's stdin/stdout
pub async fn serve_stdio(toolbox: &Toolbox) -> std::io::Result<()> {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    serve(toolbox, stdin, tokio::io::stdout()).await
}
