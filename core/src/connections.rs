//! Connection and message-log wire types.
//!
//! Field names are camelCase: these structs are rendered directly by the chat
//! UI's connection panel.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Opaque connection identifier (UUIDv7, never reused).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub const fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConnectionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Lifecycle state of a logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a registered connection and its accumulated statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: ConnectionId,
    pub name: String,
    pub url: String,
    pub state: ConnectionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_connected: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<DateTime<Utc>>,
    /// Last measured round trip in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ping: Option<u64>,
    /// Present only while `state` is `error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub message_count: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Automatic reconnect attempts since the last successful open
    #[serde(default)]
    pub reconnect_attempts: u32,
}

impl Connection {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: ConnectionId::new(),
            name: name.into(),
            url: url.into(),
            state: ConnectionState::Disconnected,
            last_connected: None,
            last_message: None,
            ping: None,
            error: None,
            message_count: 0,
            bytes_sent: 0,
            bytes_received: 0,
            reconnect_attempts: 0,
        }
    }

    pub fn reset_counters(&mut self) {
        self.message_count = 0;
        self.bytes_sent = 0;
        self.bytes_received = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    Text,
    Binary,
}

/// One observed send/receive event. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: Uuid,
    pub connection_id: ConnectionId,
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    #[serde(rename = "type")]
    pub kind: PayloadKind,
    /// Payload size in bytes
    pub size: u64,
    pub preview: String,
    /// Raw payload, kept for text frames only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

/// Request body for `POST /api/connections`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisterConnectionRequest {
    pub name: String,
    pub url: String,
}

/// Request body for `PATCH /api/connections/{id}`. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateConnectionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ConnectionState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Request body for `POST /api/connections/{id}/messages`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SendMessageRequest {
    pub text: String,
}

/// Outcome of a send request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SendOutcome {
    /// Frame written; the logged entry is returned
    Sent { entry: LogEntry },
    /// Connection was not `connected`; nothing was written or logged
    Skipped { state: ConnectionState },
    /// The transport rejected the write; the connection is now in `error`
    Failed { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConnectionListResponse {
    pub connections: Vec<Connection>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageListResponse {
    pub messages: Vec<LogEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClearMessagesResponse {
    pub cleared: usize,
}
