//! LLM provider implementations for PowerNode.
//!
//! All providers implement the `powernode_core::Provider` trait. The gateway
//! wires the configured provider into the agent loop at startup.

pub mod anthropic;

pub use anthropic::AnthropicProvider;
