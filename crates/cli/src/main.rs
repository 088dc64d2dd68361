//! PulseLoop CLI - the main entry point.
//!
//! Commands:
//! - `serve`   - Start the HTTP control surface
//! - `run`     - Run the loop headless, printing events as JSON lines
//! - `models`  - List models offered by the agent runtime
//! - `status`  - Show the effective configuration
//! - `doctor`  - Diagnose configuration and runtime reachability

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "pulseloop",
    about = "PulseLoop - drive an AI agent runtime in a continuous loop",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of ~/.pulseloop/config.toml
    #[arg(short, long, global = true, env = "PULSELOOP_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP control surface
    Serve {
        /// Override the bind host
        #[arg(long)]
        host: Option<String>,

        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run the loop in the foreground
    Run(commands::run::RunArgs),

    /// List models available on the agent runtime
    Models,

    /// Show the effective configuration
    Status,

    /// Diagnose configuration and runtime reachability
    Doctor,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so `run` can keep stdout for events.
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Serve { host, port } => commands::serve::run(config_path, host, port).await?,
        Commands::Run(args) => commands::run::run(config_path, args).await?,
        Commands::Models => commands::models::run(config_path).await?,
        Commands::Status => commands::status::run(config_path).await?,
        Commands::Doctor => commands::doctor::run(config_path).await?,
    }

    Ok(())
}
