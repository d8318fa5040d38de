//! Tool catalog assembly and execution.
//!
//! The engine owns one MCP client per enabled tool server plus the
//! built-in tools. Per request it discovers the available tools into a
//! [`ToolCatalog`] and executes the model's tool calls against it,
//! strictly in the order the model requested them. Tool failures never
//! propagate as errors; they become error results the model can react to.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use powernode_config::{LimitsConfig, OneDriveConfig, ToolServerConfig};
use powernode_core::catalog::{
    qualified_name, BuiltinTool, CatalogEntry, ToolBackend, ToolCall, ToolCatalog, ToolResult,
};
use powernode_mcp::McpClient;
use powernode_telemetry::{StepLevel, StepLog};

use crate::onedrive;
use crate::truncate;

/// Discovers and executes tools for the agent loop.
pub struct ToolEngine {
    /// Remote clients in configuration order; later servers win name collisions
    clients: Vec<Arc<McpClient>>,
    by_id: HashMap<String, Arc<McpClient>>,
    builtins: Vec<(String, Arc<dyn BuiltinTool>)>,
    limits: LimitsConfig,
}

impl ToolEngine {
    pub fn new(
        http: reqwest::Client,
        servers: &[ToolServerConfig],
        onedrive_config: &OneDriveConfig,
        limits: LimitsConfig,
    ) -> Self {
        let mut clients = Vec::new();
        let mut by_id = HashMap::new();
        for server in servers.iter().filter(|s| s.enabled) {
            let client = Arc::new(McpClient::new(http.clone(), server));
            by_id.insert(server.id.clone(), Arc::clone(&client));
            clients.push(client);
        }

        let builtins = onedrive::onedrive_builtins(&http, onedrive_config)
            .into_iter()
            .map(|tool| (onedrive::SERVER_ID.to_string(), tool))
            .collect();

        Self {
            clients,
            by_id,
            builtins,
            limits,
        }
    }

    /// Register an extra built-in tool under a server id.
    pub fn with_builtin(mut self, server_id: impl Into<String>, tool: Arc<dyn BuiltinTool>) -> Self {
        self.builtins.push((server_id.into(), tool));
        self
    }

    /// Number of configured remote servers.
    pub fn server_count(&self) -> usize {
        self.clients.len()
    }

    /// Assemble the tool catalog for one request.
    ///
    /// Built-ins register first, then each remote server in configuration
    /// order; a later registration under the same qualified name wins and
    /// the shadowing is logged. A server that fails discovery is skipped
    /// with a warning, never an error.
    pub async fn discover(&self, steps: &mut StepLog) -> ToolCatalog {
        let mut catalog = ToolCatalog::new();

        for (server_id, tool) in &self.builtins {
            let entry = CatalogEntry {
                qualified_name: qualified_name(server_id, tool.name()),
                server_id: server_id.clone(),
                tool_name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.parameters_schema(),
                backend: ToolBackend::Builtin(Arc::clone(tool)),
            };
            register_logged(&mut catalog, entry, steps);
        }
        if !self.builtins.is_empty() {
            steps.info(format!("Registered {} built-in tools", self.builtins.len()));
        }

        for client in &self.clients {
            let server_id = client.server_id();
            match client.list_tools().await {
                Ok(tools) => {
                    let count = tools.len();
                    for tool in tools {
                        let entry = CatalogEntry {
                            qualified_name: qualified_name(server_id, &tool.name),
                            server_id: server_id.to_string(),
                            tool_name: tool.name,
                            description: tool.description,
                            input_schema: tool.input_schema,
                            backend: ToolBackend::Remote,
                        };
                        register_logged(&mut catalog, entry, steps);
                    }
                    steps.info(format!("Discovered {count} tools from server '{server_id}'"));
                }
                Err(e) => {
                    steps.warn(format!("Tool discovery failed for server '{server_id}': {e}"));
                }
            }
        }

        catalog
    }

    /// Execute the model's tool calls sequentially, preserving order.
    ///
    /// Every call produces exactly one result at the same index. Failures
    /// become error results; oversized outputs are reduced before they go
    /// back to the model.
    pub async fn execute_calls(
        &self,
        catalog: &ToolCatalog,
        calls: &[ToolCall],
        steps: &mut StepLog,
    ) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(self.execute_one(catalog, call, steps).await);
        }
        results
    }

    async fn execute_one(&self, catalog: &ToolCatalog, call: &ToolCall, steps: &mut StepLog) -> ToolResult {
        let Some(entry) = catalog.resolve(&call.name) else {
            let message = format!("Tool not found: {}", call.name);
            steps.error(message.clone());
            return ToolResult::error(&call.id, message);
        };

        steps.info(format!("Executing tool {}", entry.qualified_name));
        let started = Instant::now();

        let outcome: Result<(String, bool), String> = match &entry.backend {
            ToolBackend::Builtin(tool) => match tool.execute(call.arguments.clone()).await {
                Ok(raw) => Ok((raw, false)),
                Err(e) => Err(e.to_string()),
            },
            ToolBackend::Remote => match self.by_id.get(&entry.server_id) {
                Some(client) => match client.call_tool(&entry.tool_name, call.arguments.clone()).await {
                    Ok(result) => {
                        let is_error = result.is_error;
                        Ok((result.text(), is_error))
                    }
                    Err(e) => Err(e.to_string()),
                },
                None => Err(format!("No client for server '{}'", entry.server_id)),
            },
        };

        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok((raw, is_error)) => {
                let prepared = truncate::prepare_output(raw, &self.limits);
                if prepared.truncated {
                    steps.warn(format!(
                        "Output of {} reduced: {} bytes (~{} tokens) exceeded the {} token limit",
                        entry.qualified_name,
                        prepared.original_bytes,
                        prepared.estimated_tokens,
                        self.limits.truncation_token_threshold
                    ));
                }

                if is_error {
                    steps.push_with_detail(
                        StepLevel::Error,
                        format!("Tool {} reported an error", entry.qualified_name),
                        Some(serde_json::json!({"duration_ms": duration_ms})),
                    );
                    ToolResult::error(&call.id, prepared.content)
                } else {
                    steps.push_with_detail(
                        StepLevel::Success,
                        format!("Tool {} completed", entry.qualified_name),
                        Some(serde_json::json!({
                            "duration_ms": duration_ms,
                            "result_bytes": prepared.content.len(),
                        })),
                    );
                    ToolResult::ok(&call.id, prepared.content)
                }
            }
            Err(message) => {
                steps.push_with_detail(
                    StepLevel::Error,
                    format!("Tool {} failed: {message}", entry.qualified_name),
                    Some(serde_json::json!({"duration_ms": duration_ms})),
                );
                let prepared = truncate::prepare_output(message, &self.limits);
                ToolResult::error(&call.id, prepared.content)
            }
        }
    }
}

fn register_logged(catalog: &mut ToolCatalog, entry: CatalogEntry, steps: &mut StepLog) {
    let qualified = entry.qualified_name.clone();
    let server_id = entry.server_id.clone();
    if let Some(shadowed) = catalog.register(entry) {
        steps.warn(format!(
            "Tool name collision: '{qualified}' from server '{server_id}' replaces the registration from server '{}'",
            shadowed.server_id
        ));
    }
}
