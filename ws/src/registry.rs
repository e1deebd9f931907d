//! Named logical connections and their statistics.

use std::collections::BTreeMap;

use chrono::Utc;
use persona_core::connections::{Connection, ConnectionId, ConnectionState, Direction, LogEntry};
use url::Url;

use crate::error::WsError;

/// Partial update merged into an existing connection record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionPatch {
    pub name: Option<String>,
    pub url: Option<String>,
    pub state: Option<ConnectionState>,
    pub error: Option<String>,
}

impl ConnectionPatch {
    pub fn state(state: ConnectionState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            state: Some(ConnectionState::Error),
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Keyed by UUIDv7 ids, so iteration order is registration order.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: BTreeMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, url: &str) -> Result<Connection, WsError> {
        let name = validate_name(name)?;
        let url = validate_address(url)?;
        if self.find_by_name(&name).is_some() {
            return Err(WsError::DuplicateName(name));
        }
        let connection = Connection::new(name, url.to_string());
        self.connections.insert(connection.id, connection.clone());
        Ok(connection)
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Connection> {
        let name = name.trim();
        self.connections.values().find(|conn| conn.name == name)
    }

    pub fn list(&self) -> Vec<Connection> {
        self.connections.values().cloned().collect()
    }

    /// Merge `patch` into the record. The `error` field is dropped whenever the
    /// resulting state is not `error`. Names stay unique across the registry.
    pub fn update(&mut self, id: ConnectionId, patch: ConnectionPatch) -> Result<Connection, WsError> {
        let name = patch.name.as_deref().map(validate_name).transpose()?;
        let url = patch.url.as_deref().map(validate_address).transpose()?;
        if let Some(name) = &name {
            if self.find_by_name(name).is_some_and(|other| other.id != id) {
                return Err(WsError::DuplicateName(name.clone()));
            }
        }
        let conn = self
            .connections
            .get_mut(&id)
            .ok_or(WsError::UnknownConnection(id))?;

        if let Some(name) = name {
            conn.name = name;
        }
        if let Some(url) = url {
            conn.url = url.to_string();
        }
        if let Some(state) = patch.state {
            conn.state = state;
        }
        if let Some(error) = patch.error {
            conn.error = Some(error);
        }
        if conn.state != ConnectionState::Error {
            conn.error = None;
        } else if conn.error.is_none() {
            conn.error = Some("Unknown error".to_string());
        }
        Ok(conn.clone())
    }

    pub(crate) fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    /// Fold a logged entry into its connection's counters.
    pub fn record(&mut self, entry: &LogEntry) {
        if let Some(conn) = self.connections.get_mut(&entry.connection_id) {
            conn.message_count += 1;
            match entry.direction {
                Direction::Sent => conn.bytes_sent += entry.size,
                Direction::Received => conn.bytes_received += entry.size,
            }
            conn.last_message = Some(entry.timestamp);
        }
    }

    pub fn reset_counters(&mut self, connection: Option<ConnectionId>) {
        match connection {
            Some(id) => {
                if let Some(conn) = self.connections.get_mut(&id) {
                    conn.reset_counters();
                }
            }
            None => self.connections.values_mut().for_each(Connection::reset_counters),
        }
    }

    pub(crate) fn mark_connected(&mut self, id: ConnectionId) -> Option<Connection> {
        let conn = self.connections.get_mut(&id)?;
        conn.state = ConnectionState::Connected;
        conn.last_connected = Some(Utc::now());
        conn.error = None;
        conn.reconnect_attempts = 0;
        Some(conn.clone())
    }
}

fn validate_name(name: &str) -> Result<String, WsError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(WsError::InvalidName("name must not be empty".to_string()));
    }
    Ok(trimmed.to_string())
}

/// Parse a `ws://` or `wss://` address.
pub fn validate_address(address: &str) -> Result<Url, WsError> {
    let trimmed = address.trim();
    let parsed = Url::parse(trimmed).map_err(|err| WsError::InvalidAddress {
        address: trimmed.to_string(),
        reason: err.to_string(),
    })?;
    if !matches!(parsed.scheme(), "ws" | "wss") {
        return Err(WsError::InvalidAddress {
            address: trimmed.to_string(),
            reason: format!("unsupported scheme '{}', expected ws or wss", parsed.scheme()),
        });
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(WsError::InvalidAddress {
            address: trimmed.to_string(),
            reason: "missing host".to_string(),
        });
    }
    Ok(parsed)
}
