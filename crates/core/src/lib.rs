//! # PowerNode Core
//!
//! Domain types, traits, and error definitions for the PowerNode agentic
//! chat service. This crate has **zero framework dependencies** — it
//! defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! The provider, built-in tool, and storage seams are traits defined here;
//! implementations live in their respective crates and are injected where
//! they are used. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod catalog;
pub mod error;
pub mod message;
pub mod provider;

// Re-export key types at crate root for ergonomics
pub use catalog::{BuiltinTool, CatalogEntry, ToolBackend, ToolCall, ToolCatalog, ToolResult};
pub use error::{Error, ProviderError, Result, StorageError, ToolError};
pub use message::{Conversation, ConversationId, Message, MessageToolCall, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StopReason, ToolDefinition, Usage};
