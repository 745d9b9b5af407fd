use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::jsonrpc::{
    JSONRPC_VERSION, JsonRpcError, JsonRpcId, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse,
};
use crate::types::{
    CallToolParams, CallToolResult, GetPromptParams, GetPromptResult, InitializeParams,
    InitializeResult, ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult,
    ListToolsResult, McpServerInfo, PaginatedParams, ReadResourceParams, ReadResourceResult,
};
use crate::{
    PROTOCOL_VERSION_2024_11_05, PROTOCOL_VERSION_2025_03_26, PROTOCOL_VERSION_2025_06_18,
    PROTOCOL_VERSION_LATEST,
};

/// Returned by a handler when the caller asked for something that does not exist
/// (unknown resource URI, unknown prompt). Mapped to JSON-RPC `-32602`.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct InvalidParams(pub String);

/// The capability surface a server exposes. One handler is shared by every connection.
#[async_trait]
pub trait McpHandler: Send + Sync {
    async fn list_tools(&self, params: PaginatedParams) -> anyhow::Result<ListToolsResult>;
    async fn call_tool(&self, params: CallToolParams) -> anyhow::Result<CallToolResult>;

    async fn list_resources(
        &self,
        _params: PaginatedParams,
    ) -> anyhow::Result<ListResourcesResult> {
        Ok(ListResourcesResult::default())
    }

    async fn list_resource_templates(
        &self,
        _params: PaginatedParams,
    ) -> anyhow::Result<ListResourceTemplatesResult> {
        Ok(ListResourceTemplatesResult::default())
    }

    async fn read_resource(&self, params: ReadResourceParams) -> anyhow::Result<ReadResourceResult> {
        Err(InvalidParams(format!("unknown resource: {}", params.uri)).into())
    }

    async fn list_prompts(&self, _params: PaginatedParams) -> anyhow::Result<ListPromptsResult> {
        Ok(ListPromptsResult::default())
    }

    async fn get_prompt(&self, params: GetPromptParams) -> anyhow::Result<GetPromptResult> {
        Err(InvalidParams(format!("unknown prompt: {}", params.name)).into())
    }
}

#[derive(Debug, Clone)]
pub struct McpServerConfig {
    pub server_info: McpServerInfo,
    pub instructions: Option<String>,
    pub capabilities: Value,
    pub supported_protocol_versions: Vec<String>,
}

impl McpServerConfig {
    pub fn default_for_binary(name: &str, version: &str) -> Self {
        Self {
            server_info: McpServerInfo {
                name: name.to_string(),
                version: version.to_string(),
            },
            instructions: None,
            capabilities: serde_json::json!({
                "tools": { "listChanged": false },
                "resources": { "subscribe": false, "listChanged": false },
                "prompts": { "listChanged": false }
            }),
            supported_protocol_versions: vec![
                PROTOCOL_VERSION_LATEST.to_string(),
                PROTOCOL_VERSION_2025_06_18.to_string(),
                PROTOCOL_VERSION_2025_03_26.to_string(),
                PROTOCOL_VERSION_2024_11_05.to_string(),
            ],
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    fn negotiate_protocol(&self, requested: &str) -> String {
        if self
            .supported_protocol_versions
            .iter()
            .any(|v| v == requested)
        {
            requested.to_string()
        } else {
            PROTOCOL_VERSION_LATEST.to_string()
        }
    }
}

/// True when `msg` is an `initialize` request whose params decode.
///
/// Used by transports to decide whether a message without a session may open one.
pub fn is_initialize_request(msg: &JsonRpcMessage) -> bool {
    let JsonRpcMessage::Request(req) = msg else {
        return false;
    };
    req.jsonrpc == JSONRPC_VERSION
        && req.method == "initialize"
        && req
            .params
            .as_ref()
            .is_some_and(|p| serde_json::from_value::<InitializeParams>(p.clone()).is_ok())
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum ConnState {
    New,
    InitResponded,
    Ready,
}

/// MCP server connection state machine (lifecycle enforcement + method routing).
pub struct McpConnection {
    cfg: Arc<McpServerConfig>,
    handler: Arc<dyn McpHandler>,
    state: ConnState,
    protocol_version: Option<String>,
}

impl McpConnection {
    pub fn new(cfg: Arc<McpServerConfig>, handler: Arc<dyn McpHandler>) -> Self {
        Self {
            cfg,
            handler,
            state: ConnState::New,
            protocol_version: None,
        }
    }

    pub fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.as_deref()
    }

    /// True once an `initialize` request has been answered successfully.
    pub fn is_initialized(&self) -> bool {
        self.state != ConnState::New
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnState::Ready
    }

    /// Handle a single JSON-RPC message.
    ///
    /// Returns `Some(response)` for requests, `None` for notifications or ignored messages.
    pub async fn handle_message(&mut self, msg: JsonRpcMessage) -> Option<JsonRpcResponse> {
        match msg {
            JsonRpcMessage::Request(req) => Some(self.handle_request(req).await),
            JsonRpcMessage::Notification(n) => {
                self.handle_notification(n);
                None
            }
            JsonRpcMessage::Response(_) => None,
        }
    }

    fn error(id: JsonRpcId, code: i64, message: &str, detail: Option<String>) -> JsonRpcResponse {
        JsonRpcResponse::err(
            id,
            JsonRpcError {
                code,
                message: message.to_string(),
                data: detail.map(|d| serde_json::json!({ "detail": d })),
            },
        )
    }

    fn invalid_request(id: JsonRpcId, message: &str) -> JsonRpcResponse {
        Self::error(id, -32600, message, None)
    }

    fn method_not_found(id: JsonRpcId) -> JsonRpcResponse {
        Self::error(id, -32601, "method not found", None)
    }

    fn invalid_params(id: JsonRpcId, detail: String) -> JsonRpcResponse {
        Self::error(id, -32602, "invalid params", Some(detail))
    }

    fn not_initialized(id: JsonRpcId) -> JsonRpcResponse {
        Self::error(id, -32002, "not initialized", None)
    }

    fn reply<T: Serialize>(id: JsonRpcId, res: anyhow::Result<T>) -> JsonRpcResponse {
        match res {
            Ok(v) => match serde_json::to_value(v) {
                Ok(v) => JsonRpcResponse::ok(id, v),
                Err(e) => Self::error(id, -32603, "internal error", Some(e.to_string())),
            },
            Err(e) => match e.downcast_ref::<InvalidParams>() {
                Some(InvalidParams(detail)) => Self::invalid_params(id, detail.clone()),
                None => Self::error(id, -32603, "internal error", Some(format!("{e:#}"))),
            },
        }
    }

    /// Decode optional params, falling back to `T::default()` when absent.
    fn optional_params<T: DeserializeOwned + Default>(params: Option<Value>) -> Result<T, String> {
        match params {
            Some(v) => serde_json::from_value(v).map_err(|e| e.to_string()),
            None => Ok(T::default()),
        }
    }

    fn required_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, String> {
        let v = params.ok_or_else(|| "missing params".to_string())?;
        serde_json::from_value(v).map_err(|e| e.to_string())
    }

    async fn handle_request(&mut self, req: JsonRpcRequest) -> JsonRpcResponse {
        if req.jsonrpc != JSONRPC_VERSION {
            return Self::invalid_request(req.id, "invalid jsonrpc version");
        }

        let JsonRpcRequest {
            id, method, params, ..
        } = req;

        match method.as_str() {
            "initialize" => return self.handle_initialize(id, params),
            // Allow ping in any state.
            "ping" => return JsonRpcResponse::ok(id, serde_json::json!({})),
            _ => {}
        }

        if self.state != ConnState::Ready {
            return match method.as_str() {
                "tools/list" | "tools/call" | "resources/list" | "resources/templates/list"
                | "resources/read" | "prompts/list" | "prompts/get" => Self::not_initialized(id),
                _ => Self::method_not_found(id),
            };
        }

        let handler = self.handler.clone();
        match method.as_str() {
            "tools/list" => match Self::optional_params::<PaginatedParams>(params) {
                Ok(p) => Self::reply(id, handler.list_tools(p).await),
                Err(e) => Self::invalid_params(id, e),
            },
            "tools/call" => match Self::required_params::<CallToolParams>(params) {
                Ok(p) => Self::reply(id, handler.call_tool(p).await),
                Err(e) => Self::invalid_params(id, e),
            },
            "resources/list" => match Self::optional_params::<PaginatedParams>(params) {
                Ok(p) => Self::reply(id, handler.list_resources(p).await),
                Err(e) => Self::invalid_params(id, e),
            },
            "resources/templates/list" => match Self::optional_params::<PaginatedParams>(params) {
                Ok(p) => Self::reply(id, handler.list_resource_templates(p).await),
                Err(e) => Self::invalid_params(id, e),
            },
            "resources/read" => match Self::required_params::<ReadResourceParams>(params) {
                Ok(p) => Self::reply(id, handler.read_resource(p).await),
                Err(e) => Self::invalid_params(id, e),
            },
            "prompts/list" => match Self::optional_params::<PaginatedParams>(params) {
                Ok(p) => Self::reply(id, handler.list_prompts(p).await),
                Err(e) => Self::invalid_params(id, e),
            },
            "prompts/get" => match Self::required_params::<GetPromptParams>(params) {
                Ok(p) => Self::reply(id, handler.get_prompt(p).await),
                Err(e) => Self::invalid_params(id, e),
            },
            _ => Self::method_not_found(id),
        }
    }

    fn handle_initialize(&mut self, id: JsonRpcId, params: Option<Value>) -> JsonRpcResponse {
        if self.state != ConnState::New {
            return Self::invalid_request(id, "already initialized");
        }

        let init: InitializeParams = match Self::required_params(params) {
            Ok(p) => p,
            Err(e) => return Self::invalid_params(id, e),
        };

        let negotiated = self.cfg.negotiate_protocol(&init.protocol_version);
        self.protocol_version = Some(negotiated.clone());
        self.state = ConnState::InitResponded;

        let result = InitializeResult {
            protocol_version: negotiated,
            capabilities: self.cfg.capabilities.clone(),
            server_info: self.cfg.server_info.clone(),
            instructions: self.cfg.instructions.clone(),
        };

        Self::reply(id, Ok(result))
    }

    fn handle_notification(&mut self, n: JsonRpcNotification) {
        if n.jsonrpc != JSONRPC_VERSION {
            return;
        }

        if n.method.as_str() == "notifications/initialized"
            && self.state == ConnState::InitResponded
        {
            self.state = ConnState::Ready;
        }
    }
}
