use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Structured error response for the non-tool endpoints.
/// Carries enough detail for a caller to see what went wrong and how to fix it.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// Machine-readable error code (e.g. "validation_failed", "not_found")
    pub error: String,
    /// Human-readable description of what went wrong
    pub message: String,
    /// Which field caused the error (if applicable)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// The value that was received (if applicable)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received: Option<serde_json::Value>,
    /// Request ID for tracing and debugging
    pub request_id: String,
    /// Hint about what the correct usage looks like
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docs_hint: Option<String>,
}

/// Error codes used across the API
pub mod codes {
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const NOT_FOUND: &str = "not_found";
    pub const DUPLICATE_NAME: &str = "duplicate_name";
    pub const SERVICE_UNAVAILABLE: &str = "service_unavailable";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_fields_are_omitted_when_empty() {
        let err = ApiError {
            error: codes::NOT_FOUND.to_string(),
            message: "Connection not found".to_string(),
            field: None,
            received: None,
            request_id: "req-1".to_string(),
            docs_hint: None,
        };
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["error"], "not_found");
        assert!(value.get("field").is_none());
        assert!(value.get("docs_hint").is_none());
    }
}
