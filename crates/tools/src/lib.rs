//! Tool layer for PowerNode.
//!
//! Merges the built-in OneDrive tools and every configured MCP server's
//! tools into one qualified catalog, executes the model's tool calls
//! against it, and keeps oversized results out of the context window.

pub mod engine;
pub mod onedrive;
pub mod truncate;

pub use engine::ToolEngine;
pub use onedrive::onedrive_builtins;
pub use truncate::{estimate_tokens, prepare_output, TruncationOutcome};
