use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use persona_core::tools::{ToolFailure, ToolSuccess};
use persona_mcp_runtime::ToolDescriptor;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/mcp/tools", get(list_tools))
}

/// Execution route, split out so it can carry its own rate limit.
pub fn execute_router() -> Router<AppState> {
    Router::new().route("/api/mcp/tools/{tool_id}/execute", post(execute_tool))
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct ToolListResponse {
    pub tools: Vec<ToolDescriptor>,
}

/// List registered tools
///
/// Parameters are listed in declaration order.
#[utoipa::path(
    get,
    path = "/api/mcp/tools",
    responses(
        (status = 200, description = "Registered tools", body = ToolListResponse)
    ),
    tag = "tools"
)]
pub async fn list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    Json(ToolListResponse {
        tools: state.tools.descriptors().cloned().collect(),
    })
}

/// Execute a tool
///
/// The body may be `{"parameters": {...}}`, `{"args": {...}}`, a bare
/// parameter object, or empty.
#[utoipa::path(
    post,
    path = "/api/mcp/tools/{tool_id}/execute",
    params(("tool_id" = String, Path, description = "Registered tool name")),
    request_body(content = serde_json::Value, description = "Tool parameters", content_type = "application/json"),
    responses(
        (status = 200, description = "Tool succeeded", body = ToolSuccess),
        (status = 400, description = "Invalid parameters", body = ToolFailure),
        (status = 404, description = "Unknown tool", body = ToolFailure),
        (status = 429, description = "Rate limited", body = ToolFailure),
        (status = 502, description = "Upstream network failure", body = ToolFailure),
        (status = 503, description = "Upstream unavailable", body = ToolFailure)
    ),
    tag = "tools"
)]
pub async fn execute_tool(
    State(state): State<AppState>,
    Path(tool_id): Path<String>,
    body: Bytes,
) -> Response {
    match persona_mcp_runtime::execute(&state.tools, &tool_id, &body).await {
        Ok(success) => Json(success).into_response(),
        Err(err) => {
            let status =
                StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(err.to_failure())).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::state::AppState;
    use crate::state::test_support::{json_body, state};

    fn app(state: AppState) -> Router {
        super::router()
            .merge(super::execute_router())
            .with_state(state)
    }

    fn execute(tool: &str, body: &'static str) -> Request<Body> {
        Request::post(format!("/api/mcp/tools/{tool}/execute"))
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn lists_descriptors_with_ordered_parameters() {
        let (state, _server) = state();
        let response = app(state)
            .oneshot(Request::get("/api/mcp/tools").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        let send = body["tools"]
            .as_array()
            .unwrap()
            .iter()
            .find(|t| t["name"] == "send_message")
            .unwrap()
            .clone();
        assert_eq!(send["serverId"], "persona-hub");
        let keys: Vec<_> = send["parameters"].as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["server_name", "message"]);
    }

    #[tokio::test]
    async fn executes_tool_against_registered_connection() {
        let (state, _server) = state();
        state.manager.register("desktop", "ws://x").await.unwrap();

        let response = app(state)
            .oneshot(execute("connection_status", r#"{"parameters":{"server_name":"desktop"}}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["result"]["name"], "desktop");
    }

    #[tokio::test]
    async fn unknown_tool_is_404_with_suggestion() {
        let (state, _server) = state();
        let response = app(state)
            .oneshot(execute("conection_status", "{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert_eq!(body["error"], true);
        assert_eq!(body["code"], "TOOL_NOT_FOUND");
        assert_eq!(body["hint"], "Did you mean 'connection_status'?");
    }

    #[tokio::test]
    async fn missing_required_parameter_is_400() {
        let (state, _server) = state();
        let response = app(state)
            .oneshot(execute("send_message", r#"{"server_name":"desktop"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["name"], "ValidationError");
        assert_eq!(body["message"], "Missing required parameter: message");
    }

    #[tokio::test]
    async fn send_to_disconnected_connection_is_503() {
        let (state, _server) = state();
        state.manager.register("desktop", "ws://x").await.unwrap();
        let response = app(state)
            .oneshot(execute("send_message", r#"{"args":{"server_name":"desktop","message":"hi"}}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json_body(response).await["code"], "UPSTREAM_UNAVAILABLE");
    }
}
