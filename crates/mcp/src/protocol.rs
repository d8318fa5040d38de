//! JSON-RPC 2.0 wire types for the MCP tool server protocol.
//!
//! Tool servers speak JSON-RPC 2.0 over plain HTTP POST. The three methods
//! PowerNode uses are `initialize`, `tools/list` and `tools/call`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::McpError;

/// Protocol revision sent in `initialize` and expected from servers.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// A JSON-RPC 2.0 request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 response envelope. Exactly one of `result` / `error` is
/// present on the wire; lenient servers get decoded through [`into_result`].
///
/// [`into_result`]: JsonRpcResponse::into_result
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

impl JsonRpcResponse {
    /// Resolve the envelope into a typed result, surfacing the server's
    /// error object when one is present.
    pub fn into_result<T: serde::de::DeserializeOwned>(self) -> Result<T, McpError> {
        if let Some(err) = self.error {
            return Err(McpError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        match self.result {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| McpError::Decode(format!("invalid result payload: {e}"))),
            None => Err(McpError::Decode("response carried neither result nor error".into())),
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Result payload of `initialize`.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(rename = "serverInfo", default)]
    pub server_info: Option<ServerInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Result payload of `tools/list`.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsListResult {
    pub tools: Vec<ToolSummary>,
}

/// One advertised tool from `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSummary {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default = "default_schema")]
    pub input_schema: Value,
}

fn default_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// Result payload of `tools/call`.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallResult {
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolCallResult {
    /// Concatenate all text content items into one string.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|item| match item {
                ContentItem::Text { text } => Some(text.as_str()),
                ContentItem::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ContentItem {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_envelope() {
        let req = JsonRpcRequest::new(7, "tools/list", serde_json::json!({}));
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 7);
        assert_eq!(json["method"], "tools/list");
        assert!(json["params"].is_object());
    }

    #[test]
    fn decode_tools_list_result() {
        let resp: JsonRpcResponse = serde_json::from_str(
            r#"{
                "jsonrpc": "2.0",
                "id": 1,
                "result": {
                    "tools": [
                        {"name": "read_range", "description": "Read cells", "inputSchema": {"type": "object"}},
                        {"name": "list_sheets"}
                    ]
                }
            }"#,
        )
        .unwrap();

        let list: ToolsListResult = resp.into_result().unwrap();
        assert_eq!(list.tools.len(), 2);
        assert_eq!(list.tools[0].name, "read_range");
        assert_eq!(list.tools[1].description, "");
        assert_eq!(list.tools[1].input_schema["type"], "object");
    }

    #[test]
    fn decode_error_object() {
        let resp: JsonRpcResponse = serde_json::from_str(
            r#"{"jsonrpc": "2.0", "id": 2, "error": {"code": -32603, "message": "Internal error: workbook locked"}}"#,
        )
        .unwrap();

        let err = resp.into_result::<ToolCallResult>().unwrap_err();
        match err {
            McpError::Rpc { code, message } => {
                assert_eq!(code, -32603);
                assert!(message.contains("workbook locked"));
            }
            other => panic!("Expected Rpc error, got {other:?}"),
        }
    }

    #[test]
    fn decode_missing_result_and_error() {
        let resp: JsonRpcResponse = serde_json::from_str(r#"{"jsonrpc": "2.0", "id": 3}"#).unwrap();
        let err = resp.into_result::<ToolsListResult>().unwrap_err();
        assert!(matches!(err, McpError::Decode(_)));
    }

    #[test]
    fn tool_call_result_text_joins_blocks() {
        let result: ToolCallResult = serde_json::from_str(
            r#"{
                "content": [
                    {"type": "text", "text": "Row 1: a,b,c"},
                    {"type": "image", "data": "..."},
                    {"type": "text", "text": "Row 2: d,e,f"}
                ],
                "isError": false
            }"#,
        )
        .unwrap();

        assert_eq!(result.text(), "Row 1: a,b,c\nRow 2: d,e,f");
        assert!(!result.is_error);
    }

    #[test]
    fn tool_call_result_error_flag() {
        let result: ToolCallResult = serde_json::from_str(
            r#"{"content": [{"type": "text", "text": "File not found: q3.xlsx"}], "isError": true}"#,
        )
        .unwrap();
        assert!(result.is_error);
    }

    #[test]
    fn parse_initialize_result() {
        let resp: JsonRpcResponse = serde_json::from_str(
            r#"{
                "jsonrpc": "2.0",
                "id": 1,
                "result": {
                    "protocolVersion": "2024-11-05",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "excel-mcp", "version": "0.4.1"}
                }
            }"#,
        )
        .unwrap();

        let init: InitializeResult = resp.into_result().unwrap();
        assert_eq!(init.protocol_version, PROTOCOL_VERSION);
        assert_eq!(init.server_info.unwrap().name, "excel-mcp");
    }
}
