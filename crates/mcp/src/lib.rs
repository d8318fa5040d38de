//! MCP tool server client for PowerNode.
//!
//! External tool servers are HTTP endpoints speaking JSON-RPC 2.0 with the
//! MCP method set (`initialize`, `tools/list`, `tools/call`). This crate
//! holds the wire types and a per-server client; tool discovery and
//! dispatch live in `powernode-tools`.

pub mod client;
pub mod protocol;

pub use client::McpClient;
pub use protocol::{
    ContentItem, InitializeResult, JsonRpcRequest, JsonRpcResponse, RpcError, ServerInfo,
    ToolCallResult, ToolSummary, ToolsListResult, PROTOCOL_VERSION,
};

use thiserror::Error;

/// Errors surfaced by MCP server communication.
///
/// These are transport-layer failures; the agent loop treats them as
/// non-fatal tool failures and feeds them back to the model.
#[derive(Debug, Clone, Error)]
pub enum McpError {
    #[error("HTTP {status_code} from tool server: {body}")]
    Http { status_code: u16, body: String },

    #[error("Tool server returned JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Tool server '{0}' timed out")]
    Timeout(String),

    #[error("Failed to decode tool server response: {0}")]
    Decode(String),
}
