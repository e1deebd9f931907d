use clap::Subcommand;
use serde_json::json;

use crate::util::{api_request, exit_error, parse_json_object};

#[derive(Subcommand)]
pub enum ToolCommands {
    /// List registered tools and their parameters
    List {
        /// Skip pretty-printing (raw JSON for piping)
        #[arg(long)]
        raw: bool,
    },
    /// Execute a tool
    Exec {
        /// Tool name (e.g. "send_message")
        tool: String,
        /// Tool parameters as a JSON object
        #[arg(long, short = 'p')]
        params: Option<String>,
        /// Skip pretty-printing (raw JSON for piping)
        #[arg(long)]
        raw: bool,
    },
}

pub async fn run(api_url: &str, command: ToolCommands) -> i32 {
    match command {
        ToolCommands::List { raw } => {
            api_request(api_url, reqwest::Method::GET, "/api/mcp/tools", None, &[], raw).await
        }
        ToolCommands::Exec { tool, params, raw } => {
            let parameters = match params.as_deref() {
                Some(p) => parse_json_object("--params", p)
                    .unwrap_or_else(|e| exit_error(&e, Some("Example: --params '{\"server_name\":\"desktop\"}'"))),
                None => json!({}),
            };
            let path = format!("/api/mcp/tools/{tool}/execute");
            api_request(
                api_url,
                reqwest::Method::POST,
                &path,
                Some(json!({ "parameters": parameters })),
                &[],
                raw,
            )
            .await
        }
    }
}
