//! Conclave CLI entry point.
//!
//! Commands:
//! - `ask`:    Run one request through the orchestrator
//! - `chat`:   Interactive session with follow-ups and retries
//! - `config`: Show, locate, initialize or validate the config file
//! - `status`: Show the effective configuration

use clap::{Parser, Subcommand};

mod commands;

use commands::ask::AskArgs;

#[derive(Parser)]
#[command(
    name = "conclave",
    about = "Conclave: a multi-daemon AI orchestrator",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one message and print the reply
    Ask(AskArgs),

    /// Chat interactively. `/retry` retries the last task, `/exit` quits
    Chat {
        /// Model override for every message
        #[arg(short, long)]
        model: Option<String>,

        /// Use a local Ollama server instead of the configured endpoint
        #[arg(long)]
        ollama: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show the effective configuration
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (API key masked)
    Show,
    /// Print the config file path
    Path,
    /// Write a default config file if none exists
    Init,
    /// Load and validate the config file
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Ask(args) => commands::ask::run(args).await?,
        Commands::Chat { model, ollama } => commands::chat::run(model, ollama).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show()?,
            ConfigAction::Path => commands::config_cmd::path(),
            ConfigAction::Init => commands::config_cmd::init()?,
            ConfigAction::Validate => commands::config_cmd::validate()?,
        },
        Commands::Status => commands::status::run()?,
    }

    Ok(())
}
