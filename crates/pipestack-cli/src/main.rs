//! pipestack CLI tool.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "pipestack")]
#[command(about = "Synthesize pipeline, service and billing templates", long_about = None)]
struct Cli {
    /// Application configuration file
    #[arg(long, env = "PIPESTACK_CONFIG", default_value = "pipestack.kdl")]
    config: PathBuf,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write templates, construct trees and the manifest
    Synth {
        /// Output directory
        #[arg(long, default_value = "cdk.out")]
        out: PathBuf,
        /// Only write this stack
        #[arg(long)]
        stack: Option<String>,
    },
    /// Check the configuration and synthesize without writing anything
    Validate,
    /// Show stacks, pipeline stages and the production rollout
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    match cli.command {
        Commands::Synth { out, stack } => {
            commands::synth::run(&cli.config, &out, stack.as_deref()).await?;
        }
        Commands::Validate => {
            commands::validate(&cli.config).await?;
        }
        Commands::List => {
            commands::list::run(&cli.config).await?;
        }
    }

    Ok(())
}
