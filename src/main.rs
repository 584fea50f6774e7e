//! Seal runner - allow-list and subscription workflows across many Sui wallets
//!
//! Files read from the working directory by default: `wallets.txt`,
//! `private_key.txt`, `proxies.txt`, `schedule-config.json`.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::error;

use seal_runner::cli::commands::{self, RunOptions};
use seal_runner::config::Config;
use seal_runner::workflow::TaskSelection;

/// Seal runner - batch Sui allow-list and subscription workflows
#[derive(Parser)]
#[command(name = "seal")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the selected workflows for every wallet once
    Run {
        /// Non-interactive: use the [batch] config section for missing choices
        #[arg(long)]
        scheduled: bool,

        /// Only process wallets listed in the failed-wallets file
        #[arg(long)]
        retry_failed: bool,

        /// Workflows to run
        #[arg(long, value_enum)]
        task: Option<TaskSelection>,

        /// Image URL to upload
        #[arg(long, conflicts_with_all = ["image_file", "random_image"])]
        image: Option<String>,

        /// Local image file to upload
        #[arg(long, conflicts_with = "random_image")]
        image_file: Option<PathBuf>,

        /// Pick a random image from a public image API
        #[arg(long)]
        random_image: bool,

        /// Iterations per workflow and wallet
        #[arg(long)]
        count: Option<u32>,

        /// Extra address added to every allowlist (repeatable)
        #[arg(long = "address")]
        addresses: Vec<String>,
    },

    /// Run on the configured cron schedule with retries
    Schedule {
        /// Fire once immediately before waiting for the schedule
        #[arg(long)]
        run_now: bool,
    },

    /// Show current configuration (secrets masked)
    Config,

    /// Check RPC, publishers, proxies and wallet files
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("seal_runner=info".parse()?),
        )
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run {
            scheduled,
            retry_failed,
            task,
            image,
            image_file,
            random_image,
            count,
            addresses,
        } => {
            let options = RunOptions {
                scheduled,
                retry_failed,
                task,
                image_url: image,
                image_file,
                random_image,
                count,
                addresses,
            };
            match commands::run(&config, options).await {
                Ok(code) => std::process::exit(code),
                Err(e) => Err(e),
            }
        }
        Commands::Schedule { run_now } => commands::schedule(&config, run_now).await,
        Commands::Config => commands::show_config(&config),
        Commands::Health => commands::health(&config).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
