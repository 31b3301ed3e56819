//! Outcome of one executed statement.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Engine verdict for a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Ok,
    Error,
}

/// Result package delivered to listeners and to the submitting caller.
///
/// `code` is always the exact statement text that was submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub code: String,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionRecord {
    /// Successful execution.
    #[must_use]
    pub fn ok(code: impl Into<String>, output: Option<Value>) -> Self {
        Self {
            code: code.into(),
            status: ExecutionStatus::Ok,
            output,
            error: None,
        }
    }

    /// Failed execution with the engine's message.
    #[must_use]
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            status: ExecutionStatus::Error,
            output: None,
            error: Some(message.into()),
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == ExecutionStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_record_serialization() {
        let record = ExecutionRecord::ok("table1.count();", Some(json!(42)));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            json!({"code": "table1.count();", "status": "ok", "output": 42})
        );

        let failed = ExecutionRecord::error("boom();", "ReferenceError: boom is not defined");
        let json = serde_json::to_string(&failed).unwrap();
        assert!(json.contains(r#""status":"error""#));
        assert!(!json.contains("output"));

        let parsed: ExecutionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, failed);
        assert!(!parsed.is_ok());
    }
}
