pub mod capture;
pub mod detect;
pub mod display;
pub mod error;
pub mod pipeline;
pub mod utils;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use capture::{Frame, FrameSnapshot, PixelFormat, SessionState};
pub use detect::{DetectionResult, Detector, ThresholdDetector};
pub use display::{LogRenderer, NormalizedRect, Notice, Renderer};
pub use error::{Error, Result};
pub use pipeline::{FlagState, OutputSnapshot, Pipeline};

/// The two mutually exclusive frame sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    Camera,
    Image,
}

/// System configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    pub image: ImageConfig,
    pub pipeline: PipelineConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub device_id: String,
    pub width: u32,
    pub height: u32,
    /// Frame rate requested from camera backends that pace themselves
    pub fps: u32,
    /// Bounded wait for the exclusive open-lock
    pub open_timeout_ms: u64,
    /// Images the surface may hand out before the producer starts dropping
    pub max_images: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageConfig {
    pub path: PathBuf,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Deadline for joining a stopped loop before it is detached
    pub join_timeout_ms: u64,
    /// How long the detection worker waits for a frame before rechecking cancellation
    pub worker_idle_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Source pixels per displayed pixel
    pub downscale: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig {
                device_id: "0".into(),
                width: 1920,
                height: 1080,
                fps: 30,
                open_timeout_ms: 2_500,
                max_images: 2,
            },
            image: ImageConfig {
                path: PathBuf::from("sdcard/apple.jpeg"),
                poll_interval_ms: 100,
            },
            pipeline: PipelineConfig {
                join_timeout_ms: 2_000,
                worker_idle_ms: 50,
            },
            display: DisplayConfig { downscale: 4 },
        }
    }
}

impl Config {
    /// Layer defaults, an optional TOML file and `FRAMEWATCH__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix("FRAMEWATCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}

impl CaptureConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }
}

impl ImageConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl PipelineConfig {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn worker_idle(&self) -> Duration {
        Duration::from_millis(self.worker_idle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_without_file_yields_defaults() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.capture.open_timeout(), Duration::from_millis(2_500));
        assert_eq!(config.image.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.capture.width, 1920);
        assert_eq!(config.capture.height, 1080);
    }

    #[test]
    fn file_overrides_only_named_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("framewatch.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[image]\npath = \"/tmp/frame.png\"\npoll_interval_ms = 20").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.image.path, PathBuf::from("/tmp/frame.png"));
        assert_eq!(config.image.poll_interval_ms, 20);
        assert_eq!(config.capture, Config::default().capture);
    }

    #[test]
    fn environment_overrides_file_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("framewatch.toml");
        std::fs::write(&path, "[display]\ndownscale = 2\n").unwrap();

        std::env::set_var("FRAMEWATCH__DISPLAY__DOWNSCALE", "3");
        let config = Config::load(Some(&path));
        std::env::remove_var("FRAMEWATCH__DISPLAY__DOWNSCALE");

        let config = config.unwrap();
        assert_eq!(config.display.downscale, 3);
        assert_eq!(config.pipeline, Config::default().pipeline);
    }
}
