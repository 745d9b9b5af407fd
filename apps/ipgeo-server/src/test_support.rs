use std::sync::Arc;

use async_trait::async_trait;
use ipgeo_mcp::{
    CallToolParams, CallToolResult, ContentBlock, ListToolsResult, McpHandler, McpServerConfig,
    PaginatedParams, Tool,
};

use crate::http::session::{PendingSession, Session, SessionStore};

/// Network-free handler for transport tests.
pub struct StubHandler;

#[async_trait]
impl McpHandler for StubHandler {
    async fn list_tools(&self, _params: PaginatedParams) -> anyhow::Result<ListToolsResult> {
        Ok(ListToolsResult {
            tools: vec![Tool {
                name: "echo".to_string(),
                title: None,
                description: Some("echo".to_string()),
                input_schema: serde_json::json!({ "type": "object" }),
            }],
            next_cursor: None,
        })
    }

    async fn call_tool(&self, params: CallToolParams) -> anyhow::Result<CallToolResult> {
        Ok(CallToolResult {
            content: vec![ContentBlock::text(params.name)],
            structured_content: None,
            is_error: Some(false),
        })
    }
}

pub fn test_config() -> Arc<McpServerConfig> {
    Arc::new(McpServerConfig::default_for_binary("ipgeo-mcp-test", "0.0.0"))
}

pub fn test_handler() -> Arc<dyn McpHandler> {
    Arc::new(StubHandler)
}

pub fn initialize_body(id: i64) -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "initialize",
        "params": {
            "protocolVersion": "2025-06-18",
            "capabilities": {},
            "clientInfo": { "name": "test-client", "version": "0.0.0" }
        }
    })
    .to_string()
}

/// Run a successful handshake and publish the session into `store`.
pub async fn published(store: &SessionStore) -> Arc<Session> {
    let mut pending = PendingSession::new(test_config(), test_handler());
    let msg = serde_json::from_str(&initialize_body(1)).expect("initialize json");
    let resp = pending.handshake(msg).await.expect("initialize response");
    assert!(!resp.is_error());
    pending.publish(store).await.expect("publish")
}
