//! Wire protocol between client and kernel.
//!
//! One JSON object per line, tagged by `type`.

use remote_pipeline_core::{ExecuteReply, ExecutionStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Message from client to kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Run one statement.
    Execute { msg_id: Uuid, code: String },
    /// Abandon the statement currently running.
    Interrupt,
    /// Keepalive.
    Ping,
}

impl ClientMessage {
    /// Create an execute request with a fresh message id.
    #[must_use]
    pub fn execute(code: impl Into<String>) -> Self {
        Self::Execute {
            msg_id: Uuid::new_v4(),
            code: code.into(),
        }
    }
}

/// Message from kernel to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Outcome of an execute request; `code` echoes the submitted text.
    ExecuteReply {
        msg_id: Uuid,
        code: String,
        status: ExecutionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Keepalive answer.
    Pong,
    /// Kernel-level problem not tied to a statement.
    Error { message: String },
}

impl ServerMessage {
    /// Reply for a request, as produced by a kernel.
    #[must_use]
    pub fn reply_to(msg_id: Uuid, code: impl Into<String>, reply: ExecuteReply) -> Self {
        Self::ExecuteReply {
            msg_id,
            code: code.into(),
            status: reply.status,
            output: reply.output,
            error: reply.error,
        }
    }
}

/// Serialize a message as one protocol line, newline included.
///
/// # Errors
/// Returns error if serialization fails.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_execute_wire_shape() {
        let msg = ClientMessage::execute("table1.show();");
        let line = encode_line(&msg).unwrap();
        assert!(line.ends_with('\n'));

        let value: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["type"], "execute");
        assert_eq!(value["code"], "table1.show();");
        assert!(value["msg_id"].is_string());
    }

    #[test]
    fn test_reply_parsing() {
        let msg_id = Uuid::new_v4();
        let line = json!({
            "type": "execute_reply",
            "msg_id": msg_id,
            "code": "var table1 = t();",
            "status": "error",
            "error": "ReferenceError: t is not defined",
        })
        .to_string();

        let parsed: ServerMessage = serde_json::from_str(&line).unwrap();
        assert_eq!(
            parsed,
            ServerMessage::reply_to(
                msg_id,
                "var table1 = t();",
                ExecuteReply::error("ReferenceError: t is not defined")
            )
        );
    }

    #[test]
    fn test_unit_messages() {
        let ping = serde_json::to_string(&ClientMessage::Ping).unwrap();
        assert_eq!(ping, r#"{"type":"ping"}"#);
        let pong: ServerMessage = serde_json::from_str(r#"{"type":"pong"}"#).unwrap();
        assert_eq!(pong, ServerMessage::Pong);
    }
}
