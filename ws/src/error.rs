use persona_core::connections::{ConnectionId, ConnectionState};
use thiserror::Error;

/// Errors returned to callers of the connection manager.
///
/// Transport failures on a live connection are not surfaced here: they are
/// recorded on the connection's `error` field instead.
#[derive(Debug, Error)]
pub enum WsError {
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),

    #[error("invalid connection name: {0}")]
    InvalidName(String),

    #[error("invalid connection address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("a connection named '{0}' is already registered")]
    DuplicateName(String),

    #[error("state '{0}' is set by the session lifecycle; patch only disconnected or error")]
    InvalidState(ConnectionState),

    #[error("connection manager is not running")]
    ManagerStopped,
}

/// Failures raised by a transport session.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("session closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}
