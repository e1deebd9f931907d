use clap::{Parser, Subcommand};

mod commands;
mod util;

use commands::connections::ConnectionCommands;
use commands::messages::MessageCommands;
use commands::session::SessionArgs;
use commands::tools::ToolCommands;

#[derive(Parser)]
#[command(name = "persona", version, about = "Persona hub CLI: tools, connections and live WebSocket sessions")]
struct Cli {
    /// API base URL
    #[arg(long, env = "PERSONA_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check API health
    Health,
    /// Tool discovery and execution
    Tools {
        #[command(subcommand)]
        command: ToolCommands,
    },
    /// Manage hub connections
    Connections {
        #[command(subcommand)]
        command: ConnectionCommands,
    },
    /// Inspect or clear the message log
    Messages {
        #[command(subcommand)]
        command: MessageCommands,
    },
    /// Local WebSocket tooling (no API server needed)
    Ws {
        #[command(subcommand)]
        command: WsCommands,
    },
}

#[derive(Subcommand)]
enum WsCommands {
    /// Open an interactive session: stdin lines are sent, events are printed
    Session(SessionArgs),
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    // stdout carries command output; logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "persona=warn,persona_ws=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Health => commands::health::run(&cli.api_url).await,
        Commands::Tools { command } => commands::tools::run(&cli.api_url, command).await,
        Commands::Connections { command } => {
            commands::connections::run(&cli.api_url, command).await
        }
        Commands::Messages { command } => commands::messages::run(&cli.api_url, command).await,
        Commands::Ws { command } => match command {
            WsCommands::Session(args) => commands::session::run(args).await,
        },
    };

    std::process::exit(code);
}
