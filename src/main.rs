// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use media_capture::constants::app_info;
use media_capture::{CaptureDomain, EngineConfig, logging};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "media-capture")]
#[command(about = "Capture camera, screen and audio through the capture engine")]
#[command(version = app_info::version())]
struct Cli {
    /// Log level or filter directive (overrides the config file; RUST_LOG wins over both)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available devices
    List {
        /// Only list devices of this domain
        #[arg(short, long)]
        domain: Option<CaptureDomain>,
    },

    /// List the formats of a device
    Formats {
        #[arg(short, long)]
        domain: CaptureDomain,

        /// Device id (from 'media-capture list')
        #[arg(long)]
        device: String,
    },

    /// Capture from a device
    Capture {
        #[arg(short, long)]
        domain: CaptureDomain,

        /// Device id (default device if omitted)
        #[arg(long)]
        device: Option<String>,

        /// Capture duration in seconds
        #[arg(short = 't', long, default_value = "5")]
        duration: u64,

        /// Save the last video frame as an image (file or directory)
        #[arg(short, long)]
        snapshot: Option<PathBuf>,
    },

    /// Capture camera and microphone and pair buffers by timestamp
    Sync {
        /// Capture duration in seconds
        #[arg(short = 't', long, default_value = "5")]
        duration: u64,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::load()?,
    };

    // Set RUST_LOG to override, e.g. RUST_LOG=media_capture=debug
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.log_level.to_string());
    logging::init(&level)?;

    let result = match cli.command {
        Commands::List { domain } => cli::list_devices(&config, domain),
        Commands::Formats { domain, device } => cli::list_formats(&config, domain, &device),
        Commands::Capture {
            domain,
            device,
            duration,
            snapshot,
        } => cli::capture(&config, domain, device, duration, snapshot),
        Commands::Sync { duration } => cli::sync(&config, duration),
    };

    logging::shutdown();
    result
}
