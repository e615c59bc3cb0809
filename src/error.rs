use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::capture::frame::PixelFormat;
use crate::SourceKind;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the acquisition pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// The camera open-lock could not be taken in time; `open` may be retried.
    #[error("timed out after {timeout:?} waiting to lock camera opening")]
    ResourceBusy { timeout: Duration },

    #[error("a capture session is already open on this manager")]
    AlreadyOpen,

    /// The device reported disconnect/error, or refused to open.
    #[error("camera device {device_id:?} failed: {reason}")]
    Device { device_id: String, reason: String },

    /// Session configuration failed; fatal for that open attempt only.
    #[error("capture session configuration failed: {0}")]
    Configuration(String),

    #[error("image source {path:?} is unavailable")]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error(transparent)]
    Detection(#[from] DetectorError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("detection needs an armed source")]
    NoActiveSource,

    #[error("cannot start {requested:?} source while {active:?} source is armed")]
    SourceConflict {
        requested: SourceKind,
        active: SourceKind,
    },

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error("pipeline has been shut down")]
    ShutDown,

    #[error("failed to spawn {name} thread")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Violations of the frame buffer length contract
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("{format:?} frame {width}x{height} needs {expected} bytes, got {actual}")]
    Short {
        width: u32,
        height: u32,
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },
}

/// What a detector may return instead of results
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DetectorError {
    #[error("unsupported format code {0}")]
    UnsupportedFormat(i32),

    #[error("buffer of {actual} bytes does not match {width}x{height} (expected {expected})")]
    BufferSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("detector panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Backend(String),
}
