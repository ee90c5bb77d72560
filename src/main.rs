// SPDX-License-Identifier: GPL-3.0-only

use camera_sdk::Config;
use camera_sdk::constants::app_info;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "camera-sdk")]
#[command(about = "Recording, streaming and snapshots for embedded cameras")]
#[command(version = app_info::version())]
#[command(subcommand_required = false)]
struct Cli {
    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Settings that override the configuration file
#[derive(Args, Debug, Default)]
struct Overrides {
    /// Capture device path
    #[arg(short, long, global = true)]
    device: Option<String>,

    /// Use the synthetic test source instead of a real device
    #[arg(long, global = true)]
    synthetic: bool,

    /// Configuration file (default: ~/.config/camera-sdk/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory outputs are written to while in progress
    #[arg(long, global = true)]
    scratch_dir: Option<PathBuf>,

    /// Directory finished outputs are moved to
    #[arg(long, global = true)]
    storage_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive command shell (default)
    Run,

    /// Record for a fixed duration
    Record {
        /// Output resolution: 1080p, 720p or 360p
        #[arg(short, long, default_value = "1080p")]
        resolution: String,

        /// Recording duration in seconds
        #[arg(short = 't', long, default_value = "10")]
        duration: u64,
    },

    /// Take one snapshot
    Snapshot,

    /// Print the effective configuration
    Config {
        /// Write the effective configuration back to the config file
        #[arg(long)]
        save: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=camera_sdk=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let config_path = cli.overrides.config.clone().or_else(Config::default_path);
    let config = effective_config(&cli.overrides, config_path.as_deref());

    match cli.command {
        None | Some(Commands::Run) => cli::run_shell(config),
        Some(Commands::Record {
            resolution,
            duration,
        }) => cli::record(config, &resolution, duration),
        Some(Commands::Snapshot) => cli::snapshot(config),
        Some(Commands::Config { save }) => cli::print_config(&config, save.then_some(config_path).flatten()),
    }
}

fn effective_config(overrides: &Overrides, path: Option<&std::path::Path>) -> Config {
    let mut config = match path {
        Some(path) => Config::load(path),
        None => Config::default(),
    };
    if let Some(device) = &overrides.device {
        config.device_path = device.clone();
    }
    if overrides.synthetic {
        config.synthetic = true;
    }
    if let Some(dir) = &overrides.scratch_dir {
        config.scratch_dir = dir.clone();
    }
    if let Some(dir) = &overrides.storage_dir {
        config.storage_dir = dir.clone();
    }
    config
}
