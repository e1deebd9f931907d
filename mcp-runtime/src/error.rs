use persona_core::tools::{ToolFailure, codes};
use serde_json::Value;
use thiserror::Error;

use crate::schema::ParamType;

/// Failure classes a tool call can end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolErrorKind {
    Validation,
    Authentication,
    RateLimit,
    UpstreamUnavailable,
    Network,
    NotFound,
    Internal,
}

impl ToolErrorKind {
    /// HTTP status the failure maps to.
    pub fn status(self) -> u16 {
        match self {
            ToolErrorKind::Validation => 400,
            ToolErrorKind::Authentication => 401,
            ToolErrorKind::RateLimit => 429,
            ToolErrorKind::UpstreamUnavailable => 503,
            ToolErrorKind::Network => 502,
            ToolErrorKind::NotFound => 404,
            ToolErrorKind::Internal => 500,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            ToolErrorKind::Validation => codes::VALIDATION_ERROR,
            ToolErrorKind::Authentication => codes::AUTHENTICATION_ERROR,
            ToolErrorKind::RateLimit => codes::RATE_LIMIT_ERROR,
            ToolErrorKind::UpstreamUnavailable => codes::UPSTREAM_UNAVAILABLE,
            ToolErrorKind::Network => codes::NETWORK_ERROR,
            ToolErrorKind::NotFound => codes::TOOL_NOT_FOUND,
            ToolErrorKind::Internal => codes::INTERNAL_ERROR,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ToolErrorKind::Validation => "ValidationError",
            ToolErrorKind::Authentication => "AuthenticationError",
            ToolErrorKind::RateLimit => "RateLimitError",
            ToolErrorKind::UpstreamUnavailable => "UpstreamUnavailableError",
            ToolErrorKind::Network => "NetworkError",
            ToolErrorKind::NotFound => "ToolNotFoundError",
            ToolErrorKind::Internal => "InternalError",
        }
    }
}

/// A failed tool call, raised by the gateway or by a handler.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
    pub hint: Option<String>,
    pub context: Option<Value>,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            hint: None,
            context: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Validation, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Authentication, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::RateLimit, message)
    }

    pub fn upstream_unavailable(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::UpstreamUnavailable, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Network, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Internal, message)
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn status(&self) -> u16 {
        self.kind.status()
    }

    pub fn to_failure(&self) -> ToolFailure {
        ToolFailure {
            error: true,
            name: self.kind.name().to_string(),
            code: self.kind.code().to_string(),
            message: self.message.clone(),
            hint: self.hint.clone(),
            context: self.context.clone(),
        }
    }
}

/// Rejected tool registration.
#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("tool name must not be blank")]
    BlankName,

    #[error("tool '{0}' is already registered")]
    DuplicateTool(String),

    #[error("tool '{tool}' declares parameter '{param}' more than once")]
    DuplicateParameter { tool: String, param: String },

    #[error("tool '{tool}' has a blank parameter name")]
    BlankParameter { tool: String },

    #[error("tool '{tool}' parameter '{param}' default does not match declared type {expected}")]
    DefaultTypeMismatch {
        tool: String,
        param: String,
        expected: ParamType,
    },
}
