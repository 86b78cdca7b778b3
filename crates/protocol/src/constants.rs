use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How often the server sends WebSocket pings to an observer.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(20);

/// Time to wait for a pong (or any incoming frame) before declaring
/// the observer dead.
///
/// Must be comfortably larger than [`WS_PING_PERIOD`] so one delayed
/// pong does not kill an otherwise healthy connection.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// Maximum inbound socket message size in bytes.
///
/// Observers only send small control messages (subscribe/unsubscribe/
/// ping); anything larger is a protocol violation.
pub const WS_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Default chunk size for resumable uploads: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Wire error code for an out-of-order chunk.
pub const CODE_CHUNK_MISSING: &str = "CHUNK_MISSING";

/// Wire error code for a failed whole-file checksum.
pub const CODE_CHECKSUM_MISMATCH: &str = "CHECKSUM_MISMATCH";

/// Socket message type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // Client to server
    #[serde(rename = "subscribe")]
    Subscribe,
    #[serde(rename = "unsubscribe")]
    Unsubscribe,
    #[serde(rename = "ping")]
    Ping,

    // Server to client
    #[serde(rename = "job_update")]
    JobUpdate,
    #[serde(rename = "job_complete")]
    JobComplete,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "pong")]
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&MessageType::JobUpdate).unwrap(),
            "\"job_update\""
        );
        assert_eq!(
            serde_json::to_string(&MessageType::JobComplete).unwrap(),
            "\"job_complete\""
        );
        let parsed: MessageType = serde_json::from_str("\"subscribe\"").unwrap();
        assert_eq!(parsed, MessageType::Subscribe);
    }
}
