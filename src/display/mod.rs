pub mod presenter;
pub mod renderer;

use std::fmt;
use std::path::PathBuf;

use crate::capture::frame::FrameSnapshot;
use crate::detect::DetectionResult;

pub use presenter::{Poster, Presenter};
pub use renderer::LogRenderer;

/// Rectangle in 0..1 units of the source frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedRect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl NormalizedRect {
    pub fn from_detection(result: &DetectionResult, width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        let (w, h) = (width as f32, height as f32);
        Some(Self {
            left: (result.x1 / w).clamp(0.0, 1.0),
            top: (result.y1 / h).clamp(0.0, 1.0),
            right: (result.x2 / w).clamp(0.0, 1.0),
            bottom: (result.y2 / h).clamp(0.0, 1.0),
        })
    }

    /// Scale back to pixels of a `width` x `height` surface.
    pub fn to_pixels(self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let (w, h) = (width as f32, height as f32);
        (
            (self.left * w).round() as u32,
            (self.top * h).round() as u32,
            (self.right * w).round() as u32,
            (self.bottom * h).round() as u32,
        )
    }
}

/// User-visible conditions. Delivered one by one, never coalesced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    ImageMissing { path: PathBuf },
    CameraFailed { reason: String },
    ConfigurationFailed { reason: String },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::ImageMissing { path } => write!(f, "picture {} does not exist", path.display()),
            Notice::CameraFailed { reason } => write!(f, "camera failed: {reason}"),
            Notice::ConfigurationFailed { reason } => {
                write!(f, "camera configuration failed: {reason}")
            }
        }
    }
}

/// Presentation surface.
///
/// Only ever called from the presentation thread. `frame == None` clears
/// the display.
pub trait Renderer: Send {
    fn present(&mut self, frame: Option<&FrameSnapshot>, rects: &[NormalizedRect]);

    fn notice(&mut self, _notice: &Notice) {}
}

/// Suggested display size for `frame`: source resolution divided by `downscale`.
pub fn display_size(frame: &FrameSnapshot, downscale: u32) -> (u32, u32) {
    let downscale = downscale.max(1);
    (
        (frame.width / downscale).max(1),
        (frame.height / downscale).max(1),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::PixelFormat;
    use bytes::Bytes;

    #[test]
    fn detections_normalize_against_source_size() {
        let result = DetectionResult::new(480.0, 270.0, 1920.0, 1080.0);
        let rect = NormalizedRect::from_detection(&result, 1920, 1080).unwrap();
        assert_eq!(
            rect,
            NormalizedRect {
                left: 0.25,
                top: 0.25,
                right: 1.0,
                bottom: 1.0
            }
        );
        assert_eq!(rect.to_pixels(480, 270), (120, 68, 480, 270));
        assert!(NormalizedRect::from_detection(&result, 0, 1080).is_none());
    }

    #[test]
    fn display_size_divides_by_downscale() {
        let frame = FrameSnapshot {
            data: Bytes::new(),
            width: 1920,
            height: 1080,
            format: PixelFormat::Yuv420,
            timestamp: 0,
            sequence: 0,
        };
        assert_eq!(display_size(&frame, 4), (480, 270));
        assert_eq!(display_size(&frame, 0), (1920, 1080));
    }

    #[test]
    fn missing_image_notice_names_the_path() {
        let notice = Notice::ImageMissing {
            path: PathBuf::from("sdcard/apple.jpeg"),
        };
        assert_eq!(notice.to_string(), "picture sdcard/apple.jpeg does not exist");
    }
}
