//! Loresmith CLI: the main entry point.
//!
//! Commands:
//! - `init`   : Write a default config file
//! - `ask`    : Ask one question, or chat interactively
//! - `serve`  : Start the HTTP gateway
//! - `routes` : Show which backend serves each workflow step
//! - `doctor` : Diagnose configuration and backends

use clap::{Parser, Subcommand};
use loresmith_config::{AppConfig, LoggingConfig};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "loresmith",
    about = "Loresmith — agentic question answering over your documents",
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
    /// Write the default configuration file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Ask a question (interactive when no message is given)
    Ask {
        /// The question to ask
        message: Option<String>,

        /// Persona that renders the answer (scribe, devil)
        #[arg(short, long)]
        persona: Option<String>,

        /// Continue an existing thread
        #[arg(short, long)]
        thread: Option<String>,

        /// Override the user backend's provider
        #[arg(long, env = "LORESMITH_PROVIDER")]
        provider: Option<String>,

        /// Override the user backend's model
        #[arg(long, env = "LORESMITH_MODEL")]
        model: Option<String>,

        /// Print the answer in one piece instead of streaming it
        #[arg(long)]
        no_stream: bool,

        /// Print decomposition and sources after the answer
        #[arg(long)]
        show_plan: bool,
    },

    /// Start the HTTP gateway
    Serve {
        /// Override the bind host
        #[arg(long)]
        host: Option<String>,

        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show the backend routing table
    Routes {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration, corpus and backends
    Doctor {
        /// Skip backend health checks
        #[arg(long)]
        offline: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let logging = AppConfig::load().map(|c| c.logging).unwrap_or_default();
    init_tracing(cli.verbose, &logging);

    match cli.command {
        Commands::Init { force } => commands::init::run(force).await?,
        Commands::Ask {
            message,
            persona,
            thread,
            provider,
            model,
            no_stream,
            show_plan,
        } => {
            let options = commands::ask::AskOptions {
                persona,
                thread,
                provider,
                model,
                stream: !no_stream,
                show_plan,
            };
            commands::ask::run(message, options).await?
        }
        Commands::Serve { host, port } => commands::serve::run(host, port).await?,
        Commands::Routes { json } => commands::routes::run(json).await?,
        Commands::Doctor { offline } => commands::doctor::run(offline).await?,
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise `--verbose` means debug, else the configured level.
fn init_tracing(verbose: bool, logging: &LoggingConfig) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}
