use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};

use persona_core::connections::{
    Connection, ConnectionId, ConnectionListResponse, RegisterConnectionRequest,
    SendMessageRequest, SendOutcome, UpdateConnectionRequest,
};
use persona_core::error::ApiError;
use persona_ws::ConnectionPatch;

use crate::error::AppError;
use crate::extract::AppJson;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/connections",
            get(list_connections).post(register_connection),
        )
        .route(
            "/api/connections/{id}",
            patch(update_connection).delete(delete_connection),
        )
        .route("/api/connections/{id}/connect", post(connect))
        .route("/api/connections/{id}/disconnect", post(disconnect))
        .route("/api/connections/{id}/messages", post(send_message))
}

pub(crate) fn parse_id(raw: &str) -> Result<ConnectionId, AppError> {
    raw.parse().map_err(|_| AppError::Validation {
        message: format!("'{raw}' is not a valid connection id"),
        field: Some("id".to_string()),
        received: Some(serde_json::Value::String(raw.to_string())),
        docs_hint: Some("Connection ids are the UUIDs returned by GET /api/connections.".to_string()),
    })
}

/// List registered connections
#[utoipa::path(
    get,
    path = "/api/connections",
    responses(
        (status = 200, description = "Connections in registration order", body = ConnectionListResponse),
        (status = 503, description = "Connection manager stopped", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn list_connections(
    State(state): State<AppState>,
) -> Result<Json<ConnectionListResponse>, AppError> {
    let connections = state.manager.connections().await?;
    Ok(Json(ConnectionListResponse { connections }))
}

/// Register a connection
///
/// The connection starts `disconnected`; call the connect endpoint to open it.
#[utoipa::path(
    post,
    path = "/api/connections",
    request_body = RegisterConnectionRequest,
    responses(
        (status = 201, description = "Connection registered", body = Connection),
        (status = 400, description = "Invalid name or URL", body = ApiError),
        (status = 409, description = "Name already registered", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn register_connection(
    State(state): State<AppState>,
    AppJson(req): AppJson<RegisterConnectionRequest>,
) -> Result<(StatusCode, Json<Connection>), AppError> {
    let connection = state.manager.register(&req.name, &req.url).await?;
    Ok((StatusCode::CREATED, Json(connection)))
}

/// Patch a connection's name, URL, state or error
///
/// `state` accepts `disconnected` (closes any live session) or `error`.
#[utoipa::path(
    patch,
    path = "/api/connections/{id}",
    params(("id" = String, Path, description = "Connection id")),
    request_body = UpdateConnectionRequest,
    responses(
        (status = 200, description = "Updated connection", body = Connection),
        (status = 400, description = "Invalid patch", body = ApiError),
        (status = 404, description = "Unknown connection", body = ApiError),
        (status = 409, description = "Name already registered", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn update_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
    AppJson(req): AppJson<UpdateConnectionRequest>,
) -> Result<Json<Connection>, AppError> {
    let id = parse_id(&id)?;
    let patch = ConnectionPatch {
        name: req.name,
        url: req.url,
        state: req.state,
        error: req.error,
    };
    Ok(Json(state.manager.update_state(id, patch).await?))
}

/// Deregister a connection, closing it and purging its log entries
#[utoipa::path(
    delete,
    path = "/api/connections/{id}",
    params(("id" = String, Path, description = "Connection id")),
    responses(
        (status = 204, description = "Connection removed"),
        (status = 404, description = "Unknown connection", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn delete_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id)?;
    if state.manager.deregister(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound {
            resource: "connection",
            id: id.to_string(),
        })
    }
}

/// Open a connection
///
/// Returns once the attempt resolves. A failed attempt is reported through
/// `state: "error"` and `error`, not an HTTP error.
#[utoipa::path(
    post,
    path = "/api/connections/{id}/connect",
    params(("id" = String, Path, description = "Connection id")),
    responses(
        (status = 200, description = "Connection after the attempt", body = Connection),
        (status = 404, description = "Unknown connection", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn connect(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Connection>, AppError> {
    let id = parse_id(&id)?;
    Ok(Json(state.manager.connect(id).await?))
}

/// Close a connection and cancel any pending reconnect
#[utoipa::path(
    post,
    path = "/api/connections/{id}/disconnect",
    params(("id" = String, Path, description = "Connection id")),
    responses(
        (status = 200, description = "Disconnected connection", body = Connection),
        (status = 404, description = "Unknown connection", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn disconnect(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Connection>, AppError> {
    let id = parse_id(&id)?;
    Ok(Json(state.manager.disconnect(id).await?))
}

/// Send a text frame
///
/// A connection that is not `connected` yields `status: "skipped"`.
#[utoipa::path(
    post,
    path = "/api/connections/{id}/messages",
    params(("id" = String, Path, description = "Connection id")),
    request_body = SendMessageRequest,
    responses(
        (status = 200, description = "Send outcome", body = SendOutcome),
        (status = 404, description = "Unknown connection", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    AppJson(req): AppJson<SendMessageRequest>,
) -> Result<Json<SendOutcome>, AppError> {
    let id = parse_id(&id)?;
    Ok(Json(state.manager.send_message(id, req.text).await?))
}
