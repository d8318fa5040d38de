//! Per-request step log.
//!
//! Every significant action the chat pipeline takes (provider calls, tool
//! executions, truncation, persistence) is appended here and returned to
//! the API caller alongside the reply. Appends also emit the matching
//! `tracing` event so server logs and the returned log stay in step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a step log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StepLevel {
    Info,
    Success,
    Warn,
    Error,
}

/// One entry in the step log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepEntry {
    /// When the step happened
    pub timestamp: DateTime<Utc>,

    /// Severity
    pub level: StepLevel,

    /// Human-readable description
    pub message: String,

    /// Optional structured payload (tool arguments, result sizes, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

/// Append-only log of the steps one chat request took.
#[derive(Debug, Default)]
pub struct StepLog {
    entries: Vec<StepEntry>,
}

impl StepLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and mirror it to `tracing`.
    pub fn push(&mut self, level: StepLevel, message: impl Into<String>) {
        self.push_with_detail(level, message, None);
    }

    /// Append an entry with a structured detail payload.
    pub fn push_with_detail(
        &mut self,
        level: StepLevel,
        message: impl Into<String>,
        detail: Option<serde_json::Value>,
    ) {
        let message = message.into();
        match level {
            StepLevel::Info => tracing::info!(step = %message),
            StepLevel::Success => tracing::info!(step = %message, outcome = "success"),
            StepLevel::Warn => tracing::warn!(step = %message),
            StepLevel::Error => tracing::error!(step = %message),
        }
        self.entries.push(StepEntry {
            timestamp: Utc::now(),
            level,
            message,
            detail,
        });
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(StepLevel::Info, message);
    }

    pub fn success(&mut self, message: impl Into<String>) {
        self.push(StepLevel::Success, message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.push(StepLevel::Warn, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(StepLevel::Error, message);
    }

    /// All entries in append order.
    pub fn entries(&self) -> &[StepEntry] {
        &self.entries
    }

    /// Consume the log, yielding its entries.
    pub fn into_entries(self) -> Vec<StepEntry> {
        self.entries
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

    #[test]
    fn levels_serialize_uppercase() {
        assert_eq!(serde_json::to_string(&StepLevel::Info).unwrap(), "\"INFO\"");
        assert_eq!(serde_json::to_string(&StepLevel::Success).unwrap(), "\"SUCCESS\"");
        assert_eq!(serde_json::to_string(&StepLevel::Warn).unwrap(), "\"WARN\"");
        assert_eq!(serde_json::to_string(&StepLevel::Error).unwrap(), "\"ERROR\"");
    }

    #[test]
    fn entries_keep_append_order() {
        let mut log = StepLog::new();
        log.info("building tool catalog");
        log.success("catalog ready: 5 tools");
        log.warn("iteration ceiling reached");

        let messages: Vec<&str> = log.entries().iter().map(|e| e.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "building tool catalog",
                "catalog ready: 5 tools",
                "iteration ceiling reached"
            ]
        );
    }

    #[test]
    fn detail_payload_is_optional_in_json() {
        let mut log = StepLog::new();
        log.info("plain");
        log.push_with_detail(
            StepLevel::Error,
            "tool failed",
            Some(serde_json::json!({"status": 500})),
        );

        let json = serde_json::to_string(&log.entries()[0]).unwrap();
        assert!(!json.contains("detail"));
        let json = serde_json::to_string(&log.entries()[1]).unwrap();
        assert!(json.contains("\"status\":500"));
    }
}
