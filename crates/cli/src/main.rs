//! ragstream CLI, the main entry point.
//!
//! Commands:
//! - `chat`: interactive or single-message chat over the knowledge base
//! - `retrieve`: run fusion retrieval for a query and print the passages
//! - `prompt`: show the budgeted system prompt for a query
//! - `config`: show, locate, validate or initialise the config file

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod pipeline;

#[derive(Parser)]
#[command(
    name = "ragstream",
    about = "ragstream: retrieval-augmented chat with streaming tool calls",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.ragstream/config.toml)
    #[arg(short, long, global = true, env = "RAGSTREAM_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the model, grounded in the configured collections
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Skip up-front retrieval; the model can still call retrieve_knowledge
        #[arg(long)]
        no_context: bool,
    },

    /// Fuse the configured collections for a query
    Retrieve {
        query: String,

        /// Neighbours requested per collection
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Passages kept after fusion
        #[arg(short = 'n', long)]
        max: Option<usize>,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the budgeted system prompt for a query
    Prompt {
        query: String,

        /// Extra context units, most relevant first
        #[arg(short = 'x', long = "context")]
        context: Vec<String>,

        /// Also run retrieval and append its passages as context
        #[arg(long)]
        retrieve: bool,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the config file path
    Path,
    /// Validate the configuration
    Validate,
    /// Write a default config file if none exists
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let config_path = cli
        .config
        .unwrap_or_else(|| ragstream_config::AppConfig::config_dir().join("config.toml"));

    match cli.command {
        Commands::Chat {
            message,
            no_context,
        } => commands::chat::run(&config_path, message, no_context).await?,
        Commands::Retrieve {
            query,
            top_k,
            max,
            json,
        } => commands::retrieve::run(&config_path, &query, top_k, max, json).await?,
        Commands::Prompt {
            query,
            context,
            retrieve,
        } => commands::prompt::run(&config_path, &query, context, retrieve).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(&config_path)?,
            ConfigAction::Path => commands::config_cmd::path(&config_path),
            ConfigAction::Validate => commands::config_cmd::validate(&config_path)?,
            ConfigAction::Init => commands::config_cmd::init(&config_path)?,
        },
    }

    Ok(())
}
