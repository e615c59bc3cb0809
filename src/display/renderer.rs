//! Headless renderer that reports what a display would show

use tracing::{debug, info, warn};

use crate::capture::frame::FrameSnapshot;
use crate::display::{display_size, NormalizedRect, Notice, Renderer};

/// Logs presented frames and boxes at the downscaled display size.
pub struct LogRenderer {
    downscale: u32,
    size: Option<(u32, u32)>,
    presented: u64,
}

impl LogRenderer {
    pub fn new(downscale: u32) -> Self {
        Self {
            downscale,
            size: None,
            presented: 0,
        }
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }
}

impl Renderer for LogRenderer {
    fn present(&mut self, frame: Option<&FrameSnapshot>, rects: &[NormalizedRect]) {
        let Some(frame) = frame else {
            if self.size.take().is_some() {
                info!("display cleared");
            }
            return;
        };

        let size = display_size(frame, self.downscale);
        if self.size != Some(size) {
            info!(
                "display {}x{} for {:?} source {}x{}",
                size.0, size.1, frame.format, frame.width, frame.height
            );
            self.size = Some(size);
        }
        self.presented += 1;
        for rect in rects {
            debug!(sequence = frame.sequence, "box {:?}", rect.to_pixels(size.0, size.1));
        }
    }

    fn notice(&mut self, notice: &Notice) {
        warn!("{notice}");
    }
}
