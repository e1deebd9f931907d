use clap::Subcommand;

use crate::util::api_request;

#[derive(Subcommand)]
pub enum MessageCommands {
    /// List logged messages, oldest first
    List {
        /// Restrict to one connection id
        #[arg(long)]
        connection_id: Option<String>,
        /// Skip pretty-printing (raw JSON for piping)
        #[arg(long)]
        raw: bool,
    },
    /// Clear logged messages and reset counters
    Clear {
        /// Restrict to one connection id
        #[arg(long)]
        connection_id: Option<String>,
    },
}

pub async fn run(api_url: &str, command: MessageCommands) -> i32 {
    match command {
        MessageCommands::List { connection_id, raw } => {
            let query = filter(connection_id);
            api_request(api_url, reqwest::Method::GET, "/api/messages", None, &query, raw).await
        }
        MessageCommands::Clear { connection_id } => {
            let query = filter(connection_id);
            api_request(api_url, reqwest::Method::DELETE, "/api/messages", None, &query, false)
                .await
        }
    }
}

fn filter(connection_id: Option<String>) -> Vec<(&'static str, String)> {
    connection_id
        .map(|id| vec![("connection_id", id)])
        .unwrap_or_default()
}
