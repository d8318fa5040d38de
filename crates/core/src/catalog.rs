//! Tool catalog — qualified tool names and their backends.
//!
//! Every tool the LLM can call lives in a per-request catalog under a
//! qualified name (`serverId__toolName`). An entry knows where it came
//! from and how to reach it: built-in tools run in-process, remote tools
//! go through the JSON-RPC executor. The catalog itself has no I/O; it
//! is assembled by the tools crate and consumed by the agent loop.

use crate::error::ToolError;
use crate::provider::ToolDefinition;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Separator between server id and tool name in a qualified name.
pub const QUALIFIER: &str = "__";

/// Build the qualified catalog name for a server's tool.
pub fn qualified_name(server_id: &str, tool_name: &str) -> String {
    format!("{server_id}{QUALIFIER}{tool_name}")
}

/// One LLM-requested tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the provider's tool_use id)
    pub id: String,

    /// Qualified name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

/// The result of one tool invocation, fed back to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// The result content (truncated upstream if oversized)
    pub content: String,

    /// Whether the tool failed; failures are surfaced to the LLM, not the caller
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: message.into(),
            is_error: true,
        }
    }
}

/// A tool that executes in-process (no JSON-RPC round trip).
#[async_trait]
pub trait BuiltinTool: Send + Sync {
    /// Unqualified tool name (e.g., "list_files").
    fn name(&self) -> &str;

    /// Description sent to the LLM.
    fn description(&self) -> &str;

    /// JSON Schema for the tool's input.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute with the given arguments, returning the result content.
    async fn execute(&self, arguments: serde_json::Value) -> std::result::Result<String, ToolError>;
}

/// Where a catalog entry's execution happens.
#[derive(Clone)]
pub enum ToolBackend {
    /// In-process handler
    Builtin(Arc<dyn BuiltinTool>),
    /// JSON-RPC `tools/call` against the origin server
    Remote,
}

impl std::fmt::Debug for ToolBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolBackend::Builtin(tool) => write!(f, "Builtin({})", tool.name()),
            ToolBackend::Remote => write!(f, "Remote"),
        }
    }
}

/// One tool the LLM can call, with its origin and backend.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    /// Fully qualified name (`serverId__toolName`)
    pub qualified_name: String,

    /// Origin server id (`onedrive` for built-ins)
    pub server_id: String,

    /// Original unqualified tool name
    pub tool_name: String,

    /// Description sent to the LLM
    pub description: String,

    /// JSON Schema for the tool's input
    pub input_schema: serde_json::Value,

    /// How to execute it
    pub backend: ToolBackend,
}

impl CatalogEntry {
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.qualified_name.clone(),
            description: self.description.clone(),
            parameters: self.input_schema.clone(),
        }
    }
}

/// The merged per-request tool catalog.
///
/// Lookup is by qualified name. Registering a duplicate name replaces the
/// earlier entry (last one wins) and hands the shadowed entry back so the
/// caller can log it.
#[derive(Debug, Default)]
pub struct ToolCatalog {
    entries: HashMap<String, CatalogEntry>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entry under its qualified name. Returns the entry it
    /// shadowed, if any.
    pub fn register(&mut self, entry: CatalogEntry) -> Option<CatalogEntry> {
        self.entries.insert(entry.qualified_name.clone(), entry)
    }

    /// Resolve a qualified name to its entry.
    pub fn resolve(&self, qualified: &str) -> Option<&CatalogEntry> {
        self.entries.get(qualified)
    }

    /// Tool definitions for the LLM, sorted by name for stable output.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.entries.values().map(CatalogEntry::to_definition).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// All entries, sorted by qualified name.
    pub fn entries(&self) -> Vec<&CatalogEntry> {
        let mut entries: Vec<&CatalogEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| a.qualified_name.cmp(&b.qualified_name));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote_entry(server_id: &str, tool_name: &str, description: &str) -> CatalogEntry {
        CatalogEntry {
            qualified_name: qualified_name(server_id, tool_name),
            server_id: server_id.into(),
            tool_name: tool_name.into(),
            description: description.into(),
            input_schema: serde_json::json!({"type": "object"}),
            backend: ToolBackend::Remote,
        }
    }

    #[test]
    fn qualified_names_use_double_underscore() {
        assert_eq!(qualified_name("excel", "read_range"), "excel__read_range");
    }

    #[test]
    fn register_and_resolve() {
        let mut catalog = ToolCatalog::new();
        catalog.register(remote_entry("excel", "read_range", "Read a cell range"));

        let entry = catalog.resolve("excel__read_range").expect("registered");
        assert_eq!(entry.server_id, "excel");
        assert_eq!(entry.tool_name, "read_range");
        assert!(catalog.resolve("excel__missing").is_none());
    }

    #[test]
    fn duplicate_registration_shadows_and_reports() {
        let mut catalog = ToolCatalog::new();
        catalog.register(remote_entry("excel", "read_range", "first"));
        let shadowed = catalog.register(remote_entry("excel", "read_range", "second"));

        assert_eq!(shadowed.expect("shadowed entry").description, "first");
        assert_eq!(catalog.resolve("excel__read_range").unwrap().description, "second");
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn definitions_are_sorted() {
        let mut catalog = ToolCatalog::new();
        catalog.register(remote_entry("word", "read_document", ""));
        catalog.register(remote_entry("excel", "read_range", ""));

        let names: Vec<String> = catalog.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["excel__read_range", "word__read_document"]);
    }

    #[test]
    fn tool_result_constructors() {
        let ok = ToolResult::ok("toolu_01", "42");
        assert!(!ok.is_error);
        let err = ToolResult::error("toolu_01", "Error: HTTP 500");
        assert!(err.is_error);
        assert_eq!(err.call_id, "toolu_01");
    }
}
