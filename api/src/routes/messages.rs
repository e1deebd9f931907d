use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use persona_core::connections::{ClearMessagesResponse, ConnectionId, MessageListResponse};
use persona_core::error::ApiError;

use crate::error::AppError;
use crate::routes::connections::parse_id;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/messages", get(list_messages).delete(clear_messages))
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct MessageFilter {
    /// Restrict to one connection; all connections when omitted
    pub connection_id: Option<String>,
}

impl MessageFilter {
    fn connection(&self) -> Result<Option<ConnectionId>, AppError> {
        match self.connection_id.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => parse_id(raw).map(Some),
        }
    }
}

/// List logged messages, oldest first
#[utoipa::path(
    get,
    path = "/api/messages",
    params(MessageFilter),
    responses(
        (status = 200, description = "Logged messages", body = MessageListResponse),
        (status = 400, description = "Malformed connection_id", body = ApiError)
    ),
    tag = "messages"
)]
pub async fn list_messages(
    State(state): State<AppState>,
    Query(filter): Query<MessageFilter>,
) -> Result<Json<MessageListResponse>, AppError> {
    let messages = state.manager.messages(filter.connection()?).await?;
    Ok(Json(MessageListResponse { messages }))
}

/// Clear logged messages and reset the matching connections' counters
#[utoipa::path(
    delete,
    path = "/api/messages",
    params(MessageFilter),
    responses(
        (status = 200, description = "Number of entries removed", body = ClearMessagesResponse),
        (status = 400, description = "Malformed connection_id", body = ApiError),
        (status = 404, description = "Unknown connection", body = ApiError)
    ),
    tag = "messages"
)]
pub async fn clear_messages(
    State(state): State<AppState>,
    Query(filter): Query<MessageFilter>,
) -> Result<Json<ClearMessagesResponse>, AppError> {
    let cleared = state.manager.clear_messages(filter.connection()?).await?;
    Ok(Json(ClearMessagesResponse { cleared }))
}
