//! Liveness probe payloads and pong correlation.
//!
//! Each ping carries a nonce. Only an inbound text frame that parses as JSON
//! and repeats the same nonce (a `pong` reply or a verbatim echo) resolves the
//! probe; ordinary application traffic in between is left alone.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
struct ProbePayload {
    #[serde(rename = "type")]
    kind: String,
    nonce: String,
    timestamp: i64,
}

/// A ping that has been sent and is waiting for its echo.
#[derive(Debug, Clone)]
pub struct PendingProbe {
    pub nonce: String,
    pub started: Instant,
}

impl PendingProbe {
    pub fn start() -> Self {
        Self {
            nonce: Uuid::now_v7().simple().to_string(),
            started: Instant::now(),
        }
    }

    /// The text frame to put on the wire.
    pub fn ping_payload(&self) -> String {
        let payload = ProbePayload {
            kind: "ping".to_string(),
            nonce: self.nonce.clone(),
            timestamp: Utc::now().timestamp_millis(),
        };
        serde_json::to_string(&payload).unwrap_or_else(|_| {
            format!(r#"{{"type":"ping","nonce":"{}"}}"#, self.nonce)
        })
    }

    pub fn matches(&self, text: &str) -> bool {
        extract_nonce(text).is_some_and(|nonce| nonce == self.nonce)
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
    }
}

fn extract_nonce(text: &str) -> Option<String> {
    // Cheap pre-filter before parsing every inbound frame as JSON.
    if !text.contains("nonce") {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    value.get("nonce")?.as_str().map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_payload_carries_type_and_nonce() {
        let probe = PendingProbe::start();
        let value: serde_json::Value = serde_json::from_str(&probe.ping_payload()).unwrap();
        assert_eq!(value["type"], "ping");
        assert_eq!(value["nonce"], probe.nonce.as_str());
        assert!(value["timestamp"].as_i64().is_some());
    }

    #[test]
    fn echo_and_pong_with_same_nonce_match() {
        let probe = PendingProbe::start();
        assert!(probe.matches(&probe.ping_payload()));
        let pong = format!(r#"{{"type":"pong","nonce":"{}"}}"#, probe.nonce);
        assert!(probe.matches(&pong));
    }

    #[test]
    fn unrelated_traffic_does_not_resolve_probe() {
        let probe = PendingProbe::start();
        assert!(!probe.matches("hello"));
        assert!(!probe.matches(r#"{"type":"pong","nonce":"someone-else"}"#));
        assert!(!probe.matches(r#"{"type":"chat","text":"nonce"}"#));
    }
}
