use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;

use persona_mcp_runtime::builtin::connection_tools;
use persona_ws::{ConnectionManager, ManagerConfig, TungsteniteConnector};

mod error;
mod extract;
mod middleware;
mod routes;
mod state;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Persona Hub API",
        version = "0.1.0",
        description = "Tool execution and multiplexed WebSocket connections for the persona chat client."
    ),
    paths(
        routes::health::health_check,
        routes::tools::list_tools,
        routes::tools::execute_tool,
        routes::connections::list_connections,
        routes::connections::register_connection,
        routes::connections::update_connection,
        routes::connections::delete_connection,
        routes::connections::connect,
        routes::connections::disconnect,
        routes::connections::send_message,
        routes::messages::list_messages,
        routes::messages::clear_messages,
    ),
    components(schemas(
        HealthResponse,
        routes::tools::ToolListResponse,
        persona_mcp_runtime::ToolDescriptor,
        persona_mcp_runtime::ParamSpec,
        persona_mcp_runtime::ParamType,
        persona_core::error::ApiError,
        persona_core::tools::ToolSuccess,
        persona_core::tools::ToolFailure,
        persona_core::connections::Connection,
        persona_core::connections::ConnectionId,
        persona_core::connections::ConnectionState,
        persona_core::connections::LogEntry,
        persona_core::connections::Direction,
        persona_core::connections::PayloadKind,
        persona_core::connections::SendOutcome,
        persona_core::connections::RegisterConnectionRequest,
        persona_core::connections::UpdateConnectionRequest,
        persona_core::connections::SendMessageRequest,
        persona_core::connections::ConnectionListResponse,
        persona_core::connections::MessageListResponse,
        persona_core::connections::ClearMessagesResponse,
    ))
)]
struct ApiDoc;

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "persona_api=debug,persona_ws=info,persona_mcp_runtime=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let manager_config = ManagerConfig::from_env();
    tracing::info!(config = ?manager_config, "Starting connection manager");
    let manager = ConnectionManager::spawn(manager_config, Arc::new(TungsteniteConnector));

    let tools = connection_tools(manager.clone()).expect("Built-in tools failed to register");
    tracing::info!(tools = tools.len(), "Tool registry ready");

    let app_state = state::AppState {
        manager: manager.clone(),
        tools: Arc::new(tools),
    };

    let require_https = middleware::https::enabled_from_env();
    let cors_layer = middleware::cors::build_cors_layer();

    let app = Router::new()
        .route("/api-doc/openapi.json", get(openapi_json))
        .merge(routes::health::router())
        .merge(routes::tools::router())
        .merge(routes::tools::execute_router().layer(middleware::rate_limit::tool_execute_layer()))
        .merge(routes::connections::router())
        .merge(routes::messages::router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .option_layer(require_https.then(|| {
                    axum::middleware::from_fn(middleware::https::require_https)
                }))
                .layer(cors_layer),
        )
        .with_state(app_state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Persona API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Server error");

    manager.shutdown().await;
    tracing::info!("Connection manager stopped");
}
