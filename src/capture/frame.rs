use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::FrameError;

/// Pixel formats a frame can carry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Planar/semi-planar 4:2:0, luma plane first
    Yuv420,
    /// Tightly packed 8-bit RGBA, no row padding
    #[default]
    Rgba,
    /// Compressed JPEG bitstream
    Jpeg,
}

impl PixelFormat {
    /// Exact buffer length for a frame of this format, `None` for compressed formats.
    pub fn frame_len(self, width: u32, height: u32) -> Option<usize> {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Yuv420 => Some(pixels * 3 / 2),
            PixelFormat::Rgba => Some(pixels * 4),
            PixelFormat::Jpeg => None,
        }
    }

    /// Format code handed to detectors.
    pub fn code(self) -> i32 {
        match self {
            PixelFormat::Rgba => 1,
            PixelFormat::Yuv420 => 2,
            PixelFormat::Jpeg => 3,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        [PixelFormat::Rgba, PixelFormat::Yuv420, PixelFormat::Jpeg]
            .into_iter()
            .find(|f| f.code() == code)
    }
}

/// Borrowed view of an incoming image, possibly split across planes.
///
/// Planes are concatenated in order when copied into a [`Frame`].
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pub planes: &'a [&'a [u8]],
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Monotonic capture time in nanoseconds
    pub timestamp: i64,
}

/// Outcome of copying into a frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    Reused,
    Reallocated,
}

/// Single reusable frame buffer.
///
/// The backing allocation is kept across fills and replaced only when the
/// width, height or format changes. Compressed frames may still grow the
/// allocation when a larger bitstream arrives at the same resolution.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
    timestamp: i64,
    sequence: u64,
}

impl Frame {
    /// Copy `view` into this buffer, reusing the allocation when the geometry is unchanged.
    pub fn fill(&mut self, view: &FrameView<'_>) -> Result<Fill, FrameError> {
        let available: usize = view.planes.iter().map(|p| p.len()).sum();
        let len = view
            .format
            .frame_len(view.width, view.height)
            .unwrap_or(available);
        if available < len {
            return Err(FrameError::Short {
                width: view.width,
                height: view.height,
                format: view.format,
                expected: len,
                actual: available,
            });
        }

        let fill = if self.needs_realloc(view.width, view.height, view.format) {
            self.data = Vec::with_capacity(len);
            Fill::Reallocated
        } else {
            self.data.clear();
            Fill::Reused
        };

        let mut remaining = len;
        for plane in view.planes {
            if remaining == 0 {
                break;
            }
            let take = remaining.min(plane.len());
            self.data.extend_from_slice(&plane[..take]);
            remaining -= take;
        }

        self.width = view.width;
        self.height = view.height;
        self.format = view.format;
        self.timestamp = view.timestamp;
        Ok(fill)
    }

    /// Copy another frame into this buffer, carrying its sequence number.
    pub fn copy_from(&mut self, other: &Frame) -> Fill {
        let planes = [other.data.as_slice()];
        let view = other.view(&planes);
        // A frame always satisfies its own length contract.
        let fill = self.fill(&view).unwrap_or(Fill::Reallocated);
        self.sequence = other.sequence;
        fill
    }

    fn needs_realloc(&self, width: u32, height: u32, format: PixelFormat) -> bool {
        self.data.capacity() == 0
            || self.width != width
            || self.height != height
            || self.format != format
    }

    fn view<'a>(&self, planes: &'a [&'a [u8]]) -> FrameView<'a> {
        FrameView {
            planes,
            width: self.width,
            height: self.height,
            format: self.format,
            timestamp: self.timestamp,
        }
    }

    pub(crate) fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }

    /// Drop the pixel data but keep the allocation.
    pub(crate) fn clear(&mut self) {
        self.data.clear();
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Immutable copy handed to the presentation context.
    pub fn snapshot(&self) -> FrameSnapshot {
        FrameSnapshot {
            data: Bytes::copy_from_slice(&self.data),
            width: self.width,
            height: self.height,
            format: self.format,
            timestamp: self.timestamp,
            sequence: self.sequence,
        }
    }
}

/// Frame data detached from the pipeline's buffers
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
    /// Immutable frame data - can be shared across threads without copying
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub timestamp: i64,
    pub sequence: u64,
}
