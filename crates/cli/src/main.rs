//! Connector CLI
//!
//! Usage:
//!   connector plugins                          - List the link plugin catalog
//!   connector check --config <file>            - Verify a configuration file
//!   connector run --config <file> [--messages N] - Run locally with test messages

use clap::{Parser, Subcommand};
use cli::commands::{CheckCommand, PluginsCommand, RunCommand};

#[derive(Parser)]
#[command(name = "connector")]
#[command(about = "Multi-tenant e-delivery connector")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List the link plugins with their features and link types
    Plugins(PluginsCommand),
    /// Check that every link configuration is claimed by exactly one plugin
    Check(CheckCommand),
    /// Bootstrap all domains and push test messages through the connector
    Run(RunCommand),
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Plugins(cmd) => cmd.run(cli.json),
        Commands::Check(cmd) => cmd.run(cli.json),
        Commands::Run(cmd) => cmd.run(cli.json),
    }
}
