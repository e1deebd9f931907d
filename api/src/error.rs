use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use persona_core::error::{self, ApiError};
use persona_ws::WsError;

/// Internal error type that converts to structured API responses
#[derive(Debug)]
pub enum AppError {
    /// Validation error (400)
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
        docs_hint: Option<String>,
    },
    /// Unknown resource (404)
    NotFound { resource: &'static str, id: String },
    /// Connection name already taken (409)
    DuplicateName { name: String },
    /// Connection manager is not running (503)
    Unavailable(String),
}

impl AppError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: Some(field.to_string()),
            received: None,
            docs_hint: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();

        let (status, api_error) = match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    error: error::codes::VALIDATION_FAILED.to_string(),
                    message,
                    field,
                    received,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::NotFound { resource, id } => (
                StatusCode::NOT_FOUND,
                ApiError {
                    error: error::codes::NOT_FOUND.to_string(),
                    message: format!("{resource} '{id}' not found"),
                    field: None,
                    received: Some(serde_json::Value::String(id)),
                    request_id,
                    docs_hint: Some("List connections with GET /api/connections.".to_string()),
                },
            ),
            AppError::DuplicateName { name } => (
                StatusCode::CONFLICT,
                ApiError {
                    error: error::codes::DUPLICATE_NAME.to_string(),
                    message: format!("A connection named '{name}' already exists"),
                    field: Some("name".to_string()),
                    received: Some(serde_json::Value::String(name)),
                    request_id,
                    docs_hint: Some(
                        "Connection names are unique. Pick another name or update the existing connection."
                            .to_string(),
                    ),
                },
            ),
            AppError::Unavailable(msg) => {
                tracing::error!(error = %msg, "Connection manager unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ApiError {
                        error: error::codes::SERVICE_UNAVAILABLE.to_string(),
                        message: msg,
                        field: None,
                        received: None,
                        request_id,
                        docs_hint: None,
                    },
                )
            }
        };

        (status, Json(api_error)).into_response()
    }
}

impl From<WsError> for AppError {
    fn from(err: WsError) -> Self {
        match err {
            WsError::UnknownConnection(id) => AppError::NotFound {
                resource: "connection",
                id: id.to_string(),
            },
            WsError::InvalidName(message) => AppError::validation("name", message),
            WsError::InvalidAddress { address, reason } => AppError::Validation {
                message: format!("Invalid WebSocket address: {reason}"),
                field: Some("url".to_string()),
                received: Some(serde_json::Value::String(address)),
                docs_hint: Some("Use a ws:// or wss:// URL with a host.".to_string()),
            },
            WsError::DuplicateName(name) => AppError::DuplicateName { name },
            WsError::InvalidState(state) => AppError::Validation {
                message: format!("State '{state}' cannot be set directly"),
                field: Some("state".to_string()),
                received: Some(serde_json::Value::String(state.to_string())),
                docs_hint: Some(
                    "Patch state to 'disconnected' or 'error'; use connect to open a session."
                        .to_string(),
                ),
            },
            WsError::ManagerStopped => AppError::Unavailable(err.to_string()),
        }
    }
}
