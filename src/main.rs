//! Framewatch: camera or still-image frames through a detector to a display

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use color_eyre::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use framewatch::capture::{CameraPlatform, SyntheticCamera};
use framewatch::{Config, LogRenderer, Pipeline, ThresholdDetector};

/// Luma above which the reference detector marks a pixel
const DETECT_THRESHOLD: u8 = 200;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// TOML configuration layered over the built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Frame source to start with.
    #[arg(long, value_enum, default_value_t = Source::Camera)]
    source: Source,
    /// Arm detection once the source is running.
    #[arg(long, default_value_t = false)]
    detect: bool,
    /// Override the polled image path.
    #[arg(long)]
    image_path: Option<PathBuf>,
    /// Use the V4L2 camera instead of the synthetic one.
    #[arg(long, default_value_t = false)]
    v4l2: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Camera,
    Image,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("framewatch=debug")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    let args = Args::parse();
    info!("Framewatch launching...");

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(path) = args.image_path.clone() {
        config.image.path = path;
    }
    info!("Using configuration: {:?}", config);

    let platform = camera_platform(&args, &config)?;
    let renderer = LogRenderer::new(config.display.downscale);
    let pipeline = Arc::new(Pipeline::new(
        config,
        platform,
        Box::new(ThresholdDetector::new(DETECT_THRESHOLD)),
        Box::new(renderer),
    )?);

    match args.source {
        Source::Camera => pipeline.open_camera()?,
        Source::Image => pipeline.open_image()?,
    };
    if args.detect {
        pipeline.start_detect()?;
    }

    tokio::signal::ctrl_c().await?;
    info!("Interrupted, shutting down");

    let stats = pipeline.slot_stats();
    info!(
        "frames written {}, read {}, overwritten {}",
        stats.written, stats.read, stats.overwritten
    );
    // Joins block; keep them off the runtime's workers.
    let handle = pipeline.clone();
    tokio::task::spawn_blocking(move || handle.shutdown()).await?;

    info!("Framewatch stopped");
    Ok(())
}

fn camera_platform(args: &Args, config: &Config) -> Result<Arc<dyn CameraPlatform>> {
    if args.v4l2 {
        #[cfg(feature = "v4l2")]
        return Ok(Arc::new(framewatch::capture::v4l2::V4l2Camera));
        #[cfg(not(feature = "v4l2"))]
        return Err(color_eyre::eyre::eyre!("built without the v4l2 feature"));
    }
    Ok(Arc::new(SyntheticCamera::new(config.capture.fps)))
}
