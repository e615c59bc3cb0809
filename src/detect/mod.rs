//! Detector contract and a reference luma-threshold detector

use serde::{Deserialize, Serialize};

use crate::capture::decoder::decode_jpeg;
use crate::capture::frame::PixelFormat;
use crate::error::DetectorError;

/// One detected box in source-resolution pixel space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub label: Option<String>,
    pub score: Option<f32>,
}

impl DetectionResult {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            label: None,
            score: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = Some(score);
        self
    }

    /// Order the corners and clamp them into a `width` x `height` frame.
    /// Boxes with non-finite coordinates are rejected.
    pub fn clamp_to(mut self, width: u32, height: u32) -> Option<Self> {
        if ![self.x1, self.y1, self.x2, self.y2].iter().all(|v| v.is_finite()) {
            return None;
        }
        let (w, h) = (width as f32, height as f32);
        let (x1, x2) = (self.x1.min(self.x2), self.x1.max(self.x2));
        let (y1, y2) = (self.y1.min(self.y2), self.y1.max(self.y2));
        self.x1 = x1.clamp(0.0, w);
        self.x2 = x2.clamp(0.0, w);
        self.y1 = y1.clamp(0.0, h);
        self.y2 = y2.clamp(0.0, h);
        Some(self)
    }
}

/// Runs inference on one frame.
///
/// Called synchronously from the detection worker and allowed to block for
/// as long as inference takes.
pub trait Detector: Send {
    fn detect(
        &mut self,
        buffer: &[u8],
        format_code: i32,
        width: u32,
        height: u32,
    ) -> Result<Vec<DetectionResult>, DetectorError>;
}

impl<F> Detector for F
where
    F: FnMut(&[u8], i32, u32, u32) -> Result<Vec<DetectionResult>, DetectorError> + Send,
{
    fn detect(
        &mut self,
        buffer: &[u8],
        format_code: i32,
        width: u32,
        height: u32,
    ) -> Result<Vec<DetectionResult>, DetectorError> {
        self(buffer, format_code, width, height)
    }
}

/// Reports the bounding box of every pixel brighter than a luma threshold.
#[derive(Debug, Clone)]
pub struct ThresholdDetector {
    threshold: u8,
}

impl ThresholdDetector {
    pub fn new(threshold: u8) -> Self {
        Self { threshold }
    }
}

impl Detector for ThresholdDetector {
    fn detect(
        &mut self,
        buffer: &[u8],
        format_code: i32,
        width: u32,
        height: u32,
    ) -> Result<Vec<DetectionResult>, DetectorError> {
        let format =
            PixelFormat::from_code(format_code).ok_or(DetectorError::UnsupportedFormat(format_code))?;
        let w = width as usize;
        let bright = match format {
            PixelFormat::Rgba => {
                check_len(buffer, format, width, height)?;
                self.bounds(w, buffer.chunks_exact(4).map(luma))
            }
            PixelFormat::Yuv420 => {
                check_len(buffer, format, width, height)?;
                self.bounds(w, buffer[..w * height as usize].iter().copied())
            }
            PixelFormat::Jpeg => {
                let rgba = decode_jpeg(buffer).map_err(|e| DetectorError::Backend(e.to_string()))?;
                self.bounds(rgba.width() as usize, rgba.as_raw().chunks_exact(4).map(luma))
            }
        };

        Ok(bright
            .map(|b| {
                let area = ((b.x2 - b.x1) * (b.y2 - b.y1)) as f32;
                DetectionResult::new(b.x1 as f32, b.y1 as f32, b.x2 as f32, b.y2 as f32)
                    .with_label("bright")
                    .with_score(b.count as f32 / area)
            })
            .into_iter()
            .collect())
    }
}

struct Bounds {
    x1: usize,
    y1: usize,
    x2: usize,
    y2: usize,
    count: usize,
}

impl ThresholdDetector {
    fn bounds(&self, width: usize, lumas: impl Iterator<Item = u8>) -> Option<Bounds> {
        if width == 0 {
            return None;
        }
        let mut found: Option<Bounds> = None;
        for (i, y) in lumas.enumerate() {
            if y < self.threshold {
                continue;
            }
            let (px, py) = (i % width, i / width);
            match found.as_mut() {
                Some(b) => {
                    b.x1 = b.x1.min(px);
                    b.y1 = b.y1.min(py);
                    b.x2 = b.x2.max(px + 1);
                    b.y2 = b.y2.max(py + 1);
                    b.count += 1;
                }
                None => {
                    found = Some(Bounds {
                        x1: px,
                        y1: py,
                        x2: px + 1,
                        y2: py + 1,
                        count: 1,
                    })
                }
            }
        }
        found
    }
}

fn luma(rgba: &[u8]) -> u8 {
    ((u32::from(rgba[0]) * 77 + u32::from(rgba[1]) * 150 + u32::from(rgba[2]) * 29) >> 8) as u8
}

fn check_len(
    buffer: &[u8],
    format: PixelFormat,
    width: u32,
    height: u32,
) -> Result<(), DetectorError> {
    let expected = format.frame_len(width, height).unwrap_or(buffer.len());
    if buffer.len() != expected {
        return Err(DetectorError::BufferSize {
            width,
            height,
            expected,
            actual: buffer.len(),
        });
    }
    Ok(())
}
