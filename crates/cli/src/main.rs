//! Stereo fruit sizing CLI
//!
//! Runs the sizing pipeline on local files and prints JSON reports.

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use rayon::ThreadPoolBuilder;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod commands;

use commands::config::ConfigCommand;
use commands::flat::FlatCommand;
use commands::stereo::StereoCommand;

#[derive(Parser)]
#[command(
    name = "stereo-size",
    version,
    about = "Estimate fruit distance, diameter and volume from stereo frames",
    after_help = "EXAMPLES:\n  \
                  # Size fruit in side-by-side frames, disparity maps go to ./out\n  \
                  stereo-size stereo --output-dir out tree_01.jpg tree_02.jpg\n\n  \
                  # Pixel-only sizes for a single camera image\n  \
                  stereo-size flat photo.jpg\n\n  \
                  # Show the configuration after file and environment overrides\n  \
                  stereo-size --config rig.yaml config"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Pipeline configuration file (YAML)
    #[arg(short, long, global = true, env = "STEREO_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Size fruit in side-by-side stereo frames
    Stereo(StereoCommand),

    /// Pixel-only sizing of single images
    Flat(FlatCommand),

    /// Print the resolved configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Matcher and detector parallelism can be capped for shared machines
    if let Ok(threads) = std::env::var("STEREO_SIZE_THREADS") {
        if let Ok(num_threads) = threads.parse::<usize>() {
            ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build_global()
                .ok();
        }
    }

    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    // Reports go to stdout, logs to stderr
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let config = commands::load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Stereo(cmd) => cmd.execute(config).await,
        Commands::Flat(cmd) => cmd.execute(config).await,
        Commands::Config(cmd) => cmd.execute(&config),
    }
}
