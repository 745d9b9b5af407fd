//! Model Context Protocol (MCP) primitives used by the ipgeo server.
//!
//! This crate is intentionally scoped to the server side of the protocol:
//! - JSON-RPC 2.0 message types
//! - the per-connection lifecycle state machine (`initialize` → `notifications/initialized`)
//! - the [`McpHandler`] trait that exposes tools, resources, and prompts
//!
//! Transports (stdio, Streamable HTTP) live in the server binary; this crate never does I/O.

mod jsonrpc;
mod server;
mod sse;
mod types;

pub use jsonrpc::{
    JsonRpcError, JsonRpcId, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
};
pub use server::{InvalidParams, McpConnection, McpHandler, McpServerConfig, is_initialize_request};
pub use sse::{decode_sse_events, encode_sse_event, parse_first_json_message_from_sse};
pub use types::{
    CallToolParams, CallToolResult, ContentBlock, GetPromptParams, GetPromptResult,
    InitializeParams, InitializeResult, ListPromptsResult, ListResourceTemplatesResult,
    ListResourcesResult, ListToolsResult, McpClientInfo, McpServerInfo, PaginatedParams, Prompt,
    PromptArgument, PromptMessage, ReadResourceParams, ReadResourceResult, Resource,
    ResourceContents, ResourceTemplate, Role, Tool,
};

/// Latest protocol version supported by this implementation.
pub const PROTOCOL_VERSION_LATEST: &str = "2025-11-25";

/// Older protocol versions still commonly used by clients.
pub const PROTOCOL_VERSION_2025_06_18: &str = "2025-06-18";
pub const PROTOCOL_VERSION_2025_03_26: &str = "2025-03-26";
pub const PROTOCOL_VERSION_2024_11_05: &str = "2024-11-05";
