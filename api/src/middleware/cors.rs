use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::CorsLayer;

const DEFAULT_ORIGINS: &str = "http://localhost:3000";

/// Build a CORS layer from the `PERSONA_CORS_ORIGINS` env var.
///
/// - Origins: comma-separated list (default: `http://localhost:3000`)
/// - Methods: GET, POST, PATCH, DELETE, OPTIONS
/// - Headers: Authorization, Content-Type
/// - Max age: 3600s
pub fn build_cors_layer() -> CorsLayer {
    let origins = parse_origins(
        &std::env::var("PERSONA_CORS_ORIGINS").unwrap_or_else(|_| DEFAULT_ORIGINS.to_string()),
    );

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            HeaderName::from_static("authorization"),
            HeaderName::from_static("content-type"),
        ])
        .allow_credentials(true)
        .max_age(std::time::Duration::from_secs(3600))
}

fn parse_origins(raw: &str) -> Vec<HeaderValue> {
    let mut origins: Vec<HeaderValue> = Vec::new();
    for origin in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match origin.parse::<HeaderValue>() {
            Ok(value) if !origins.contains(&value) => origins.push(value),
            Ok(_) => {}
            Err(_) => tracing::warn!(origin = %origin, "Ignoring invalid CORS origin"),
        }
    }
    origins
}
