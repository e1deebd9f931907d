//! `AppJson<T>`: `axum::Json<T>` whose rejections become structured
//! `AppError` responses instead of axum's plain-text bodies.

use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
};

use crate::error::AppError;

pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => Err(map_json_rejection(rejection)),
        }
    }
}

pub fn map_json_rejection(rejection: JsonRejection) -> AppError {
    let body_text = rejection.body_text();
    AppError::Validation {
        field: Some(field_from_serde_message(&body_text).unwrap_or_else(|| "body".to_string())),
        message: format!("Invalid request body: {body_text}"),
        received: None,
        docs_hint: Some(
            "Check the request body against GET /api-doc/openapi.json.".to_string(),
        ),
    }
}

/// Field named in serde's "missing field `x`" / "unknown field `x`" messages.
fn field_from_serde_message(msg: &str) -> Option<String> {
    ["missing field `", "unknown field `"].iter().find_map(|marker| {
        let rest = &msg[msg.find(marker)? + marker.len()..];
        rest.find('`').map(|end| rest[..end].to_string())
    })
}
