use std::sync::Arc;

use ipgeo_mcp::{
    JsonRpcError, JsonRpcId, JsonRpcMessage, JsonRpcResponse, McpConnection, McpHandler,
    McpServerConfig,
};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt as _, AsyncWrite, AsyncWriteExt as _, BufReader};
use tracing::info;

/// Serve one MCP connection over newline-delimited JSON on stdin/stdout until stdin closes.
pub async fn run_stdio(cfg: Arc<McpServerConfig>, handler: Arc<dyn McpHandler>) -> anyhow::Result<()> {
    info!("serving MCP over stdio");
    let conn = McpConnection::new(cfg, handler);
    serve_lines(conn, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await?;
    info!("stdin closed");
    Ok(())
}

async fn serve_lines<R, W>(mut conn: McpConnection, input: R, mut out: W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let resp = match decode_line(&line) {
            Ok(msg) => conn.handle_message(msg).await,
            Err(resp) => Some(resp),
        };
        if let Some(resp) = resp {
            write_jsonrpc(&mut out, &resp).await?;
        }
    }
    Ok(())
}

fn decode_line(line: &str) -> Result<JsonRpcMessage, JsonRpcResponse> {
    let val: Value = serde_json::from_str(line)
        .map_err(|e| protocol_error(-32700, "Parse error", Some(e.to_string())))?;
    if val.is_array() {
        return Err(protocol_error(-32600, "batching not supported", None));
    }
    serde_json::from_value(val)
        .map_err(|e| protocol_error(-32600, "Invalid Request", Some(e.to_string())))
}

pub(crate) fn protocol_error(code: i64, message: &str, detail: Option<String>) -> JsonRpcResponse {
    JsonRpcResponse::err(
        JsonRpcId::Null,
        JsonRpcError {
            code,
            message: message.to_string(),
            data: detail.map(|d| serde_json::json!({ "detail": d })),
        },
    )
}

async fn write_jsonrpc<W: AsyncWrite + Unpin>(out: &mut W, resp: &JsonRpcResponse) -> anyhow::Result<()> {
    let line = serde_json::to_string(resp)?;
    out.write_all(line.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{initialize_body, test_config, test_handler};

    #[tokio::test]
    async fn answers_requests_and_skips_notifications() -> anyhow::Result<()> {
        let input = format!(
            "{}\n\n{}\n{}\nnot json\n[1]\n",
            initialize_body(1),
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
        );
        let mut out = Vec::new();
        let conn = McpConnection::new(test_config(), test_handler());
        serve_lines(conn, input.as_bytes(), &mut out).await?;

        let replies = String::from_utf8(out)?
            .lines()
            .map(serde_json::from_str::<Value>)
            .collect::<Result<Vec<_>, _>>()?;
        assert_eq!(replies.len(), 4);
        assert_eq!(replies[0]["id"], 1);
        assert!(replies[0]["result"]["protocolVersion"].is_string());
        assert_eq!(replies[1]["id"], 2);
        assert!(replies[1]["result"]["tools"].is_array());
        assert_eq!(replies[2]["error"]["code"], -32700);
        assert_eq!(replies[2]["id"], Value::Null);
        assert_eq!(replies[3]["error"]["code"], -32600);
        Ok(())
    }
}
