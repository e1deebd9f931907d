use clap::{Args, Subcommand};
use serde_json::{Map, Value, json};

use crate::util::{api_request, exit_error};

#[derive(Subcommand)]
pub enum ConnectionCommands {
    /// List registered connections
    List,
    /// Register a connection (starts disconnected)
    Add {
        /// Unique display name
        #[arg(long)]
        name: String,
        /// ws:// or wss:// address
        #[arg(long)]
        url: String,
    },
    /// Patch a connection's name, URL or state
    Update(UpdateArgs),
    /// Deregister a connection and purge its messages
    Remove { id: String },
    /// Open a connection and wait for the attempt to resolve
    Connect { id: String },
    /// Close a connection and cancel pending reconnects
    Disconnect { id: String },
    /// Send a text frame
    Send {
        id: String,
        /// Message text
        #[arg(long, short = 't')]
        text: String,
    },
}

#[derive(Args)]
pub struct UpdateArgs {
    pub id: String,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub url: Option<String>,
    /// disconnected (closes the session) | error
    #[arg(long)]
    pub state: Option<String>,
    /// Error message (only kept while state is error)
    #[arg(long)]
    pub error: Option<String>,
}

impl UpdateArgs {
    fn body(&self) -> Value {
        let mut body = Map::new();
        let fields = [
            ("name", &self.name),
            ("url", &self.url),
            ("state", &self.state),
            ("error", &self.error),
        ];
        for (key, value) in fields {
            if let Some(v) = value {
                body.insert(key.to_string(), json!(v));
            }
        }
        Value::Object(body)
    }
}

pub async fn run(api_url: &str, command: ConnectionCommands) -> i32 {
    use reqwest::Method;

    match command {
        ConnectionCommands::List => {
            api_request(api_url, Method::GET, "/api/connections", None, &[], false).await
        }
        ConnectionCommands::Add { name, url } => {
            let body = json!({ "name": name, "url": url });
            api_request(api_url, Method::POST, "/api/connections", Some(body), &[], false).await
        }
        ConnectionCommands::Update(args) => {
            let body = args.body();
            if body.as_object().is_some_and(Map::is_empty) {
                exit_error(
                    "Nothing to update",
                    Some("Pass at least one of --name, --url, --state, --error"),
                );
            }
            let path = format!("/api/connections/{}", args.id);
            api_request(api_url, Method::PATCH, &path, Some(body), &[], false).await
        }
        ConnectionCommands::Remove { id } => {
            let path = format!("/api/connections/{id}");
            api_request(api_url, Method::DELETE, &path, None, &[], false).await
        }
        ConnectionCommands::Connect { id } => {
            let path = format!("/api/connections/{id}/connect");
            api_request(api_url, Method::POST, &path, None, &[], false).await
        }
        ConnectionCommands::Disconnect { id } => {
            let path = format!("/api/connections/{id}/disconnect");
            api_request(api_url, Method::POST, &path, None, &[], false).await
        }
        ConnectionCommands::Send { id, text } => {
            let path = format!("/api/connections/{id}/messages");
            let body = json!({ "text": text });
            api_request(api_url, Method::POST, &path, Some(body), &[], false).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_body_contains_only_given_fields() {
        let args = UpdateArgs {
            id: "x".to_string(),
            name: Some("laptop".to_string()),
            url: None,
            state: Some("error".to_string()),
            error: None,
        };
        assert_eq!(args.body(), json!({ "name": "laptop", "state": "error" }));
    }
}
