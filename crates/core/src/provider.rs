//! Provider trait — the abstraction over the LLM backend.
//!
//! A Provider knows how to send a conversation (plus the tool catalog)
//! to an LLM and get a response back. The agent loop calls `complete()`
//! without knowing which provider is behind it, which is also what makes
//! the loop testable with a mock.

use crate::error::ProviderError;
use crate::message::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A provider request: one round trip of the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "claude-sonnet-4-20250514")
    pub model: String,

    /// System context, sent out-of-band from the message list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// The conversation messages
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Tools the model may call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

fn default_temperature() -> f32 {
    0.7
}

/// A tool definition sent to the LLM so it knows what it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The qualified tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's input
    pub parameters: serde_json::Value,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of the assistant turn
    EndTurn,
    /// The model wants tool calls executed
    ToolUse,
    /// Token budget exhausted
    MaxTokens,
    /// A stop sequence matched
    StopSequence,
    /// Anything this enum does not model
    #[serde(other)]
    Other,
}

impl StopReason {
    /// Whether the loop should execute tools and go around again.
    pub fn wants_tools(self) -> bool {
        self == StopReason::ToolUse
    }
}

/// A complete response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated message (text plus any requested tool calls)
    pub message: Message,

    /// Why generation stopped
    pub stop_reason: Option<StopReason>,

    /// Token usage for this round trip
    pub usage: Option<Usage>,

    /// Which model actually responded
    pub model: String,
}

/// Token usage for one provider round trip.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// The core Provider trait.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "anthropic").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ProviderRequest) -> std::result::Result<ProviderResponse, ProviderError>;
}
