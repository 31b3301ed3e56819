//! Session configuration.

use serde::{Deserialize, Serialize};

const fn default_listener_history() -> usize {
    256
}

const fn default_broadcast_capacity() -> usize {
    1024
}

/// Tunables shared by one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Records retained for subscribers that join late.
    #[serde(default = "default_listener_history")]
    pub listener_history: usize,

    /// Capacity of the live record broadcast.
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,

    /// Command line of a kernel process speaking the wire protocol on stdio.
    #[serde(default)]
    pub kernel_command: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            listener_history: default_listener_history(),
            broadcast_capacity: default_broadcast_capacity(),
            kernel_command: None,
        }
    }
}

impl SessionConfig {
    /// Parse a JSON configuration document; missing fields take defaults.
    ///
    /// # Errors
    /// Returns error if the document is not valid JSON for this shape.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    #[must_use]
    pub const fn with_listener_history(mut self, records: usize) -> Self {
        self.listener_history = records;
        self
    }

    #[must_use]
    pub const fn with_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_kernel_command(mut self, command: impl Into<String>) -> Self {
        self.kernel_command = Some(command.into());
        self
    }
}
