//! Error types for the PowerNode domain.
//!
//! Uses `thiserror` for ergonomic error definitions. Each bounded context
//! has its own enum, and fatality is a property of where the error occurs:
//! configuration and LLM transport failures abort the request, tool-side
//! failures become error-flagged tool results, and persistence failures
//! are logged and swallowed.

use thiserror::Error;

/// The top-level error type for PowerNode operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider (LLM transport) errors: fatal for the request ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors: non-fatal, surfaced to the LLM as failed results ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Persistence errors: logged and swallowed by the caller ---
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    // --- Configuration errors: fatal for the request ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    /// Qualified name not present in the catalog.
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Blob I/O failed: {0}")]
    Blob(String),

    #[error("Payload serialization failed: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn tool_error_displays_correctly() {
        let err = Error::Tool(ToolError::NotFound("excel__read_range".into()));
        assert!(err.to_string().contains("excel__read_range"));
    }

    #[test]
    fn config_error_constructor() {
        let err = Error::config("no AI provider is enabled");
        assert!(err.to_string().contains("no AI provider is enabled"));
    }
}
