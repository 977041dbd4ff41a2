//! subroute - Mail routing delivery agent entry point

mod commands;
mod message;
mod transport;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use subroute_common::config::{Config, LoggingConfig};
use subroute_core::RoutingError;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit codes from sysexits.h
pub mod exit {
    pub const OK: u8 = 0;
    pub const FAILURE: u8 = 1;
    pub const NOUSER: u8 = 67;
    pub const TEMPFAIL: u8 = 75;
    pub const CONFIG: u8 = 78;
}

#[derive(Parser)]
#[command(name = "subroute")]
#[command(about = "Subaddress-aware mail routing with failover forwarding", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./subroute.toml, then /etc/subroute/subroute.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Route one message read from a file or standard input
    Deliver {
        /// Envelope sender
        #[arg(long)]
        sender: String,

        /// Envelope recipient
        #[arg(long)]
        recipient: String,

        /// Message file (reads standard input when omitted)
        #[arg(long)]
        input: Option<PathBuf>,
    },

    /// Show how a recipient would be routed without sending anything
    Check {
        /// Envelope recipient
        #[arg(long)]
        recipient: String,
    },

    /// Manage the SQLite configuration store
    Store {
        #[command(subcommand)]
        action: StoreAction,
    },
}

#[derive(Subcommand)]
enum StoreAction {
    /// Print the value stored under a key
    Get { key: String },

    /// Store a value under a key
    Set { key: String, value: String },

    /// Delete a key
    Delete { key: String },

    /// List all entries
    List,

    /// Import entries from a JSON object of strings
    Import { file: PathBuf },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("subroute: {}", e);
            return ExitCode::from(exit::CONFIG);
        }
    };

    init_logging(&config.logging);

    let result = match cli.command {
        Commands::Deliver {
            sender,
            recipient,
            input,
        } => commands::deliver(&config, sender, recipient, input).await,
        Commands::Check { recipient } => commands::check(&config, &recipient).await,
        Commands::Store { action } => commands::store(&config, action).await,
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("subroute: {:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

/// Map an error to the exit code telling the caller whether to retry
fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(e) = err.downcast_ref::<RoutingError>() {
        return match e {
            RoutingError::Setup(_) => exit::CONFIG,
            _ => exit::TEMPFAIL,
        };
    }

    match err.downcast_ref::<subroute_common::Error>() {
        Some(subroute_common::Error::Config(_)) => exit::CONFIG,
        Some(subroute_common::Error::Validation(_)) => exit::FAILURE,
        _ => exit::TEMPFAIL,
    }
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let json = config.format == "json";

    tracing_subscriber::registry()
        .with(json.then(|| {
            fmt::layer()
                .json()
                .with_target(true)
                .with_level(true)
                .with_writer(std::io::stderr)
        }))
        .with((!json).then(|| {
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_writer(std::io::stderr)
        }))
        .with(filter)
        .init();
}
