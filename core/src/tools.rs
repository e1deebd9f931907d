//! Tool execution envelopes shared by the gateway and its HTTP clients.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// Successful tool execution: `{"success": true, "result": ...}`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ToolSuccess {
    pub success: bool,
    pub result: Value,
}

impl ToolSuccess {
    pub fn new(result: Value) -> Self {
        Self {
            success: true,
            result,
        }
    }
}

/// Failed tool execution: `{"error": true, "name", "code", "message", "hint"?, "context"?}`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ToolFailure {
    pub error: bool,
    /// Failure class, e.g. "ValidationError"
    pub name: String,
    /// Machine-readable code, e.g. "VALIDATION_ERROR"
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

/// Failure codes emitted by the tool gateway
pub mod codes {
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const AUTHENTICATION_ERROR: &str = "AUTHENTICATION_ERROR";
    pub const RATE_LIMIT_ERROR: &str = "RATE_LIMIT_ERROR";
    pub const UPSTREAM_UNAVAILABLE: &str = "UPSTREAM_UNAVAILABLE";
    pub const NETWORK_ERROR: &str = "NETWORK_ERROR";
    pub const TOOL_NOT_FOUND: &str = "TOOL_NOT_FOUND";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}
