// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use envlight::anchors::{AnchorNetwork, cache_file_name};
use envlight::service::{self, ServiceContext};
use envlight::{AnchorPainting, ComputeBackend, PanoramaQuality, ServerConfig};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "envlight")]
#[command(about = "Environment lighting reconstruction server for AR clients")]
#[command(version = env!("ENVLIGHT_BUILD_VERSION"))]
struct Cli {
    /// Configuration file (default: <config dir>/envlight/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Panorama quality preset (low, medium, high)
    #[arg(short, long, global = true)]
    quality: Option<PanoramaQuality>,

    /// Where kernels run (auto, cpu, gpu)
    #[arg(long, global = true)]
    compute: Option<ComputeBackend>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve keyframes over TCP (default)
    Serve {
        /// Listen address, e.g. 0.0.0.0:8753
        #[arg(short, long)]
        bind: Option<String>,

        /// Record every connection under this directory
        #[arg(long)]
        record: Option<PathBuf>,

        /// Anchor painting mode (nearest-sample, depth-tested)
        #[arg(long)]
        anchor_painting: Option<AnchorPainting>,
    },

    /// Build the anchor network and write its cache
    Precompute {
        /// Cache directory (default: configured cache_dir)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Replay a recorded connection and write the final environment map
    Replay {
        /// Recording directory containing <n>.bin messages
        dir: PathBuf,

        /// Output PNG (default: <dir>/replay_envmap.png)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also dump the final point cloud and anchors as LAS into this directory
        #[arg(long)]
        las: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=envlight=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("envlight=info")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    let mut config = ServerConfig::load(cli.config.as_deref())?;
    if let Some(quality) = cli.quality {
        config.quality = quality;
    }
    if let Some(compute) = cli.compute {
        config.compute = compute;
    }

    match cli.command {
        None => serve(config).await,
        Some(Commands::Serve {
            bind,
            record,
            anchor_painting,
        }) => {
            if let Some(bind) = bind {
                config.bind_address = bind;
            }
            if record.is_some() {
                config.recording_dir = record;
            }
            if let Some(mode) = anchor_painting {
                config.anchor_painting = mode;
            }
            serve(config).await
        }
        Some(Commands::Precompute { output }) => precompute(config, output),
        Some(Commands::Replay { dir, output, las }) => replay(config, dir, output, las).await,
    }
}

async fn serve(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        version = env!("ENVLIGHT_BUILD_VERSION"),
        quality = %config.quality,
        "Starting envlight"
    );
    let context = ServiceContext::initialize(config).await?;
    service::serve(context).await?;
    Ok(())
}

fn precompute(
    config: ServerConfig,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    let dir = output
        .or(config.cache_dir.clone())
        .ok_or("No cache directory configured; pass --output")?;
    let params = config.anchor_params();
    let network = AnchorNetwork::load_or_build(params, Some(&dir))?;
    println!(
        "Anchor network: {} anchors, {} neighbours, canvas {} -> {}",
        network.anchor_count(),
        network.neighbor_count(),
        network.canvas_size(),
        dir.join(cache_file_name(&params)).display()
    );
    Ok(())
}

async fn replay(
    mut config: ServerConfig,
    dir: PathBuf,
    output: Option<PathBuf>,
    las: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let output = output.unwrap_or_else(|| dir.join("replay_envmap.png"));
    config.recording_dir = None;
    let context = ServiceContext::initialize(config).await?;

    let summary = tokio::task::spawn_blocking(move || {
        service::replay_recording(&dir, context, &output, las.as_deref()).map(|summary| (summary, output))
    })
    .await??;

    let (summary, output) = summary;
    println!(
        "Replayed {} messages ({} replies) -> {}",
        summary.messages,
        summary.replies,
        output.display()
    );
    Ok(())
}
