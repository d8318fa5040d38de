//! HTTP client for one configured MCP tool server.

use std::sync::atomic::{AtomicU64, Ordering};

use powernode_config::ToolServerConfig;
use serde_json::Value;
use tracing::debug;

use crate::protocol::*;
use crate::McpError;

/// Client for a single JSON-RPC 2.0 tool server endpoint.
///
/// Each configured server gets its own client; the underlying HTTP client
/// is shared and injected at construction.
pub struct McpClient {
    server_id: String,
    url: String,
    api_key: Option<String>,
    n8n_instance_url: Option<String>,
    supplier_id: Option<String>,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl McpClient {
    /// Build a client from a server's configuration entry.
    pub fn new(http: reqwest::Client, server: &ToolServerConfig) -> Self {
        Self {
            server_id: server.id.clone(),
            url: server.url.trim_end_matches('/').to_string(),
            api_key: server.api_key.clone(),
            n8n_instance_url: server.n8n_instance_url.clone(),
            supplier_id: server.supplier_id.clone(),
            http,
            next_id: AtomicU64::new(1),
        }
    }

    /// Identifier of the server this client talks to.
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Perform the `initialize` handshake.
    pub async fn initialize(&self) -> Result<InitializeResult, McpError> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "powernode",
                "version": env!("CARGO_PKG_VERSION"),
            },
        });
        self.post("initialize", params).await?.into_result()
    }

    /// Fetch the server's advertised tools.
    pub async fn list_tools(&self) -> Result<Vec<ToolSummary>, McpError> {
        let result: ToolsListResult = self.post("tools/list", serde_json::json!({})).await?.into_result()?;
        Ok(result.tools)
    }

    /// Invoke a tool by its unqualified name.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, McpError> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments,
        });
        self.post("tools/call", params).await?.into_result()
    }

    fn build_request(&self, method: &str, params: Value) -> JsonRpcRequest {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        JsonRpcRequest::new(id, method, params)
    }

    async fn post(&self, method: &str, params: Value) -> Result<JsonRpcResponse, McpError> {
        let request = self.build_request(method, params);
        debug!(server_id = %self.server_id, method, request_id = request.id, "MCP request");

        let mut builder = self
            .http
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&request);

        if let Some(ref key) = self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        if let Some(ref instance) = self.n8n_instance_url {
            builder = builder.header("x-n8n-instance-url", instance);
        }
        if let Some(ref supplier) = self.supplier_id {
            builder = builder.header("x-supplier-id", supplier);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                McpError::Timeout(self.server_id.clone())
            } else {
                McpError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::Http {
                status_code: status,
                body,
            });
        }

        response
            .json::<JsonRpcResponse>()
            .await
            .map_err(|e| McpError::Decode(format!("invalid JSON-RPC response: {e}")))
    }
}
