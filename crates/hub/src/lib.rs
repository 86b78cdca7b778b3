//! Real-time notification hub.
//!
//! A single coordinating loop owns the set of connected observers and
//! the per-job subscription sets; every mutation flows through
//! serialized messages into that loop, so nothing outside it ever
//! touches the sets. Observer connections run their own read/write
//! pumps and talk to the loop through a [`HubHandle`].

mod auth;
mod connection;
mod hub;
mod server;

pub use auth::{StaticTokenValidator, TokenValidator};
pub use connection::Sender;
pub use hub::{Hub, HubHandle};
pub use server::{HubServer, HubServerConfig};

/// Outbound buffer capacity per observer.
///
/// A burst of progress updates for several concurrent jobs must not
/// saturate a healthy connection; a full buffer means the observer has
/// stopped draining and its messages are dropped rather than blocking
/// the publisher.
pub const SEND_BUFFER_SIZE: usize = 256;

/// Errors produced by the hub server.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("upgrade rejected: missing or invalid token")]
    Unauthorized,
}
