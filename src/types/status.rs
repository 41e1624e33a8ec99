//! Connection state and status events broadcast to collaborators

use serde::{Deserialize, Serialize};

/// Broker connectivity as seen by the publish side
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Signals emitted by the publish coordinator and connection watchdog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatusEvent {
    ConnectionChanged { state: ConnectionState },
    ConnectionError { detail: String },
    /// A publish or drain delivered at least one message; `flushed` counts
    /// backlog messages delivered from the outbound queue.
    PublishSucceeded { flushed: usize },
    PublishFailed { detail: String },
    MessageBuffered { pending: usize },
    HeartbeatTimeout { silent_for_secs: u64 },
    HeartbeatRestored,
}
