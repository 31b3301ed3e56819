//! The engine seam driven by the execution channel.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::record::{ExecutionRecord, ExecutionStatus};

/// Session identifier.
pub type SessionId = Uuid;

/// Engine answer for one statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteReply {
    pub status: ExecutionStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
}

impl ExecuteReply {
    /// Successful reply.
    #[must_use]
    pub const fn ok(output: Option<Value>) -> Self {
        Self {
            status: ExecutionStatus::Ok,
            output,
            error: None,
        }
    }

    /// Failed reply.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Error,
            output: None,
            error: Some(message.into()),
        }
    }

    /// Attach the submitted statement text.
    #[must_use]
    pub fn into_record(self, code: impl Into<String>) -> ExecutionRecord {
        ExecutionRecord {
            code: code.into(),
            status: self.status,
            output: self.output,
            error: self.error,
        }
    }
}

/// Failure to reach the engine at all, as opposed to a statement error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("Engine disconnected")]
    Disconnected,
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// A remote, stateful engine that runs statements one at a time.
///
/// Implementations need not serialize calls themselves; the execution
/// channel never has more than one `execute` outstanding per session.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Run one statement and report its outcome.
    async fn execute(&self, code: &str) -> Result<ExecuteReply, EngineError>;

    /// Ask the engine to abandon whatever it is running.
    async fn interrupt(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct Echo;

    #[async_trait]
    impl Engine for Echo {
        async fn execute(&self, code: &str) -> Result<ExecuteReply, EngineError> {
            Ok(ExecuteReply::ok(Some(json!(code.len()))))
        }
    }

    #[test]
    fn test_default_interrupt_is_noop() {
        let engine = Echo;
        tokio_test::assert_ok!(tokio_test::block_on(engine.interrupt()));
    }

    #[test]
    fn test_reply_into_record() {
        let reply = tokio_test::block_on(Echo.execute("table1.count();")).unwrap();
        let record = reply.into_record("table1.count();");
        assert!(record.is_ok());
        assert_eq!(record.code, "table1.count();");
        assert_eq!(record.output, Some(json!(15)));

        let failed = ExecuteReply::error("bad").into_record("x();");
        assert_eq!(failed.error.as_deref(), Some("bad"));
    }
}
