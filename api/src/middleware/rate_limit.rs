use axum::Json;
use axum::http::{HeaderValue, Response, StatusCode};
use axum::response::IntoResponse;
use persona_core::tools::{ToolFailure, codes};
use tower_governor::{
    GovernorError, GovernorLayer, governor::GovernorConfigBuilder,
    key_extractor::SmartIpKeyExtractor,
};

type RateLimitLayer =
    GovernorLayer<SmartIpKeyExtractor, governor::middleware::NoOpMiddleware, axum::body::Body>;

/// Rate limit for POST /api/mcp/tools/{tool_id}/execute: 60 requests/minute per IP.
pub fn tool_execute_layer() -> RateLimitLayer {
    GovernorLayer::new(
        GovernorConfigBuilder::default()
            .per_second(1) // 60 per minute = 1 per second replenish
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .expect("invalid governor config for tool_execute"),
    )
    .error_handler(tool_failure_handler)
}

/// Answers in the tool failure envelope so callers see a `RateLimitError`.
fn tool_failure_handler(err: GovernorError) -> Response<axum::body::Body> {
    let (status, retry_after, failure) = rate_limit_failure(err);
    let mut response = (status, Json(failure)).into_response();
    if let Some(value) = retry_after.and_then(|secs| HeaderValue::from_str(&secs.to_string()).ok())
    {
        response.headers_mut().insert("retry-after", value);
    }
    response
}

fn rate_limit_failure(err: GovernorError) -> (StatusCode, Option<u64>, ToolFailure) {
    let (status, retry_after, code, name, message) = match err {
        GovernorError::TooManyRequests { wait_time, .. } => (
            StatusCode::TOO_MANY_REQUESTS,
            Some(wait_time),
            codes::RATE_LIMIT_ERROR,
            "RateLimitError",
            format!("Too many requests. Retry after {wait_time} seconds."),
        ),
        GovernorError::UnableToExtractKey => (
            StatusCode::INTERNAL_SERVER_ERROR,
            None,
            codes::INTERNAL_ERROR,
            "InternalError",
            "Unable to determine client identity for rate limiting".to_string(),
        ),
        GovernorError::Other { code, msg, .. } => (
            code,
            None,
            codes::INTERNAL_ERROR,
            "InternalError",
            msg.unwrap_or_default().to_string(),
        ),
    };
    let failure = ToolFailure {
        error: true,
        name: name.to_string(),
        code: code.to_string(),
        message,
        hint: None,
        context: None,
    };
    (status, retry_after, failure)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_many_requests_maps_to_rate_limit_failure() {
        let (status, retry_after, failure) = rate_limit_failure(GovernorError::TooManyRequests {
            wait_time: 7,
            headers: None,
        });
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(retry_after, Some(7));
        assert!(failure.error);
        assert_eq!(failure.code, "RATE_LIMIT_ERROR");
    }
}
