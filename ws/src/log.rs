//! Append-only message log shared by every connection.

use std::collections::VecDeque;

use chrono::Utc;
use persona_core::connections::{ConnectionId, Direction, LogEntry, PayloadKind};
use uuid::Uuid;

use crate::transport::Frame;

/// Number of characters kept in a text preview.
pub const PREVIEW_CHARS: usize = 100;

/// Observed send/receive events in insertion order.
#[derive(Debug)]
pub struct MessageLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl MessageLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append an entry, evicting the oldest one when full.
    pub fn append(&mut self, entry: LogEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Remove entries for one connection, or everything when `connection` is `None`.
    /// Returns the number of removed entries.
    pub fn clear(&mut self, connection: Option<ConnectionId>) -> usize {
        let before = self.entries.len();
        match connection {
            Some(id) => self.entries.retain(|entry| entry.connection_id != id),
            None => self.entries.clear(),
        }
        before - self.entries.len()
    }

    pub fn entries(&self, connection: Option<ConnectionId>) -> Vec<LogEntry> {
        self.entries
            .iter()
            .filter(|entry| connection.is_none_or(|id| entry.connection_id == id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Build a log entry for a data frame. Returns `None` for close frames.
pub fn entry_for_frame(
    connection_id: ConnectionId,
    direction: Direction,
    frame: &Frame,
) -> Option<LogEntry> {
    let (kind, size, preview, payload) = match frame {
        Frame::Text(text) => (
            PayloadKind::Text,
            text.len() as u64,
            text_preview(text),
            Some(text.clone()),
        ),
        Frame::Binary(bytes) => (
            PayloadKind::Binary,
            bytes.len() as u64,
            binary_preview(bytes.len()),
            None,
        ),
        Frame::Close { .. } => return None,
    };

    Some(LogEntry {
        id: Uuid::now_v7(),
        connection_id,
        timestamp: Utc::now(),
        direction,
        kind,
        size,
        preview,
        payload,
    })
}

fn text_preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

fn binary_preview(len: usize) -> String {
    format!("[Binary data: {len} bytes]")
}
