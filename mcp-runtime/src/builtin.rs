//! Tools operating on the process's connection manager.

use persona_core::connections::{Connection, SendOutcome};
use persona_ws::{ConnectionManager, WsError};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{RegistryError, ToolError};
use crate::registry::{ToolRegistry, ToolRegistryBuilder};
use crate::schema::{ParamSpec, ParamType, ToolDescriptor};

pub const SERVER_ID: &str = "persona-hub";
const CATEGORY: &str = "connections";

#[derive(Debug, Deserialize)]
struct ServerName {
    server_name: String,
}

#[derive(Debug, Deserialize)]
struct SendParams {
    server_name: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ClearParams {
    #[serde(default)]
    server_name: Option<String>,
}

fn descriptor(name: &str, description: &str) -> ToolDescriptor {
    ToolDescriptor::new(name, description)
        .category(CATEGORY)
        .server_id(SERVER_ID)
}

fn server_name_param() -> ParamSpec {
    ParamSpec::required(ParamType::String, "Name of a registered connection")
}

fn manager_error(err: WsError) -> ToolError {
    match err {
        WsError::ManagerStopped => ToolError::upstream_unavailable(err.to_string()),
        WsError::UnknownConnection(_) => ToolError::validation(err.to_string())
            .with_context(json!({ "parameter": "server_name" })),
        other => ToolError::internal(other.to_string()),
    }
}

fn to_json(value: impl serde::Serialize) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(|err| ToolError::internal(err.to_string()))
}

async fn resolve(manager: &ConnectionManager, name: &str) -> Result<Connection, ToolError> {
    manager
        .find_by_name(name)
        .await
        .map_err(manager_error)?
        .ok_or_else(|| {
            ToolError::validation(format!("Unknown server_name '{name}'"))
                .with_hint("Use list_connections to see registered connections")
                .with_context(json!({ "parameter": "server_name", "received": name }))
        })
}

/// Registry holding only the connection tools.
pub fn connection_tools(manager: ConnectionManager) -> Result<ToolRegistry, RegistryError> {
    register_connection_tools(ToolRegistry::builder(), manager).map(ToolRegistryBuilder::build)
}

pub fn register_connection_tools(
    builder: ToolRegistryBuilder,
    manager: ConnectionManager,
) -> Result<ToolRegistryBuilder, RegistryError> {
    let list_manager = manager.clone();
    let status_manager = manager.clone();
    let send_manager = manager.clone();
    let clear_manager = manager;

    builder
        .register_typed(
            descriptor("list_connections", "List every registered connection with its state and counters"),
            move |_: Value| {
                let manager = list_manager.clone();
                async move {
                    let connections = manager.connections().await.map_err(manager_error)?;
                    Ok::<_, ToolError>(json!({ "connections": to_json(connections)? }))
                }
            },
        )?
        .register_typed(
            descriptor("connection_status", "Current state, latency and counters of one connection")
                .param("server_name", server_name_param()),
            move |params: ServerName| {
                let manager = status_manager.clone();
                async move { to_json(resolve(&manager, &params.server_name).await?) }
            },
        )?
        .register_typed(
            descriptor("send_message", "Send a text frame over a connected connection")
                .param("server_name", server_name_param())
                .param("message", ParamSpec::required(ParamType::String, "Text to send")),
            move |params: SendParams| {
                let manager = send_manager.clone();
                async move {
                    let conn = resolve(&manager, &params.server_name).await?;
                    let outcome = manager
                        .send_message(conn.id, params.message)
                        .await
                        .map_err(manager_error)?;
                    match outcome {
                        SendOutcome::Sent { entry } => Ok(json!({
                            "serverName": conn.name,
                            "entry": to_json(entry)?,
                        })),
                        SendOutcome::Skipped { state } => Err(ToolError::upstream_unavailable(
                            format!("Connection '{}' is not connected (state: {state})", conn.name),
                        )
                        .with_hint("Connect it first, then retry")
                        .with_context(json!({ "state": state }))),
                        SendOutcome::Failed { message } => Err(ToolError::network(message)),
                    }
                }
            },
        )?
        .register_typed(
            descriptor("clear_messages", "Clear the message log of one connection, or of all")
                .param(
                    "server_name",
                    ParamSpec::optional(ParamType::String, "Connection to clear; all when omitted"),
                ),
            move |params: ClearParams| {
                let manager = clear_manager.clone();
                async move {
                    let target = match params.server_name {
                        Some(name) => Some(resolve(&manager, &name).await?.id),
                        None => None,
                    };
                    let cleared = manager.clear_messages(target).await.map_err(manager_error)?;
                    Ok::<_, ToolError>(json!({ "cleared": cleared }))
                }
            },
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolErrorKind;
    use crate::gateway::execute;
    use persona_ws::ManagerConfig;
    use persona_ws::testing::mock_transport;

    async fn setup() -> (ToolRegistry, ConnectionManager) {
        let (connector, _server) = mock_transport();
        let manager = ConnectionManager::spawn(ManagerConfig::default(), connector);
        manager.register("desktop", "ws://x").await.unwrap();
        (connection_tools(manager.clone()).unwrap(), manager)
    }

    #[tokio::test]
    async fn descriptors_share_server_and_category() {
        let (registry, _manager) = setup().await;
        let names: Vec<_> = registry.descriptors().map(|d| d.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["list_connections", "connection_status", "send_message", "clear_messages"]
        );
        assert!(registry
            .descriptors()
            .all(|d| d.server_id == SERVER_ID && d.category == CATEGORY));
    }

    #[tokio::test]
    async fn connection_status_resolves_by_name() {
        let (registry, _manager) = setup().await;
        let success = execute(&registry, "connection_status", br#"{"parameters":{"server_name":"desktop"}}"#)
            .await
            .unwrap();
        assert_eq!(success.result["name"], "desktop");
        assert_eq!(success.result["state"], "disconnected");
    }

    #[tokio::test]
    async fn unknown_server_name_is_a_validation_failure() {
        let (registry, _manager) = setup().await;
        let err = execute(&registry, "connection_status", br#"{"server_name":"laptop"}"#)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::Validation);
        assert!(err.message.contains("laptop"));
    }

    #[tokio::test]
    async fn send_on_disconnected_connection_is_upstream_unavailable() {
        let (registry, manager) = setup().await;
        let err = execute(&registry, "send_message", br#"{"args":{"server_name":"desktop","message":"hi"}}"#)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::UpstreamUnavailable);
        assert_eq!(err.status(), 503);
        assert!(manager.messages(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_and_clear_cover_all_connections() {
        let (registry, manager) = setup().await;
        manager.register("phone", "ws://phone").await.unwrap();

        let listed = execute(&registry, "list_connections", b"").await.unwrap();
        assert_eq!(listed.result["connections"].as_array().unwrap().len(), 2);

        let cleared = execute(&registry, "clear_messages", b"{}").await.unwrap();
        assert_eq!(cleared.result, json!({ "cleared": 0 }));
    }

    #[tokio::test]
    async fn clear_with_empty_server_name_is_rejected() {
        let (registry, _manager) = setup().await;
        let bodies: [&[u8]; 2] = [br#"{"server_name":""}"#, br#"{"args":{"server_name":null}}"#];
        for body in bodies {
            let err = execute(&registry, "clear_messages", body).await.unwrap_err();
            assert_eq!(err.kind, ToolErrorKind::Validation);
            assert!(err.message.contains("server_name"), "{}", err.message);
        }
    }
}
