//! Interactive WebSocket session driven by an in-process connection manager.
//!
//! Lines read from stdin are sent as text frames; manager events are printed
//! to stdout as one JSON object per line.

use std::sync::Arc;

use clap::Args;
use persona_core::connections::{ConnectionState, SendOutcome};
use persona_ws::{ConnectionManager, ManagerConfig, ManagerEvent, TungsteniteConnector};
use serde_json::{Value, json};
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

#[derive(Args, Clone, Debug)]
pub struct SessionArgs {
    /// Connection display name
    #[arg(long, default_value = "session")]
    pub name: String,
    /// ws:// or wss:// address
    #[arg(long)]
    pub url: String,
}

enum Input {
    Send(String),
    Status,
    Quit,
}

fn parse_input(line: &str) -> Option<Input> {
    match line.trim_end_matches(['\r', '\n']) {
        "" => None,
        "/quit" | "/exit" => Some(Input::Quit),
        "/status" => Some(Input::Status),
        text => Some(Input::Send(text.to_string())),
    }
}

fn render_event(event: &ManagerEvent) -> Value {
    match event {
        ManagerEvent::ConnectionChanged(conn) => json!({
            "event": "connection",
            "state": conn.state,
            "error": conn.error,
            "ping": conn.ping,
            "reconnectAttempts": conn.reconnect_attempts,
        }),
        ManagerEvent::ConnectionRemoved(id) => json!({ "event": "removed", "id": id }),
        ManagerEvent::MessageLogged(entry) => json!({
            "event": "message",
            "direction": entry.direction,
            "type": entry.kind,
            "size": entry.size,
            "preview": entry.preview,
        }),
        ManagerEvent::MessagesCleared(_) => json!({ "event": "cleared" }),
        ManagerEvent::ReconnectScheduled { attempt, delay, .. } => json!({
            "event": "reconnect_scheduled",
            "attempt": attempt,
            "delayMs": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

pub async fn run(args: SessionArgs) -> i32 {
    let manager = ConnectionManager::spawn(ManagerConfig::from_env(), Arc::new(TungsteniteConnector));
    let code = drive(&manager, &args).await;
    manager.shutdown().await;
    code
}

async fn drive(manager: &ConnectionManager, args: &SessionArgs) -> i32 {
    let mut events = manager.subscribe();

    let conn = match manager.register(&args.name, &args.url).await {
        Ok(conn) => conn,
        Err(err) => {
            eprintln!("{}", json!({ "error": "cli_error", "message": err.to_string() }));
            return 4;
        }
    };

    match manager.connect(conn.id).await {
        Ok(opened) if opened.state == ConnectionState::Connected => {
            tracing::info!(url = %opened.url, "Session connected");
        }
        Ok(opened) => {
            // Reconnects continue in the background when enabled.
            tracing::warn!(state = %opened.state, error = ?opened.error, "Initial connect failed");
        }
        Err(err) => {
            eprintln!("{}", json!({ "error": "connection_error", "message": err.to_string() }));
            return 3;
        }
    }

    let mut lines = BufReader::new(io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(err) => {
                        tracing::error!(error = %err, "Failed to read stdin");
                        break;
                    }
                };
                match parse_input(&line) {
                    None => {}
                    Some(Input::Quit) => break,
                    Some(Input::Status) => match manager.connection(conn.id).await {
                        Ok(current) => println!("{}", json!({ "event": "status", "connection": current })),
                        Err(err) => tracing::error!(error = %err, "Status lookup failed"),
                    },
                    Some(Input::Send(text)) => match manager.send_message(conn.id, text).await {
                        Ok(SendOutcome::Sent { .. }) => {}
                        Ok(SendOutcome::Skipped { state }) => {
                            println!("{}", json!({ "event": "skipped", "state": state }));
                        }
                        Ok(SendOutcome::Failed { message }) => {
                            println!("{}", json!({ "event": "send_failed", "message": message }));
                        }
                        Err(err) => {
                            tracing::error!(error = %err, "Send failed");
                            return 2;
                        }
                    },
                }
            }
            event = events.recv() => match event {
                Ok(event) => println!("{}", render_event(&event)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event stream lagged");
                }
                Err(RecvError::Closed) => return 2,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    if let Err(err) = manager.disconnect(conn.id).await {
        tracing::debug!(error = %err, "Disconnect on exit failed");
    }
    0
}
