//! Test-pattern camera: a bright square sweeping across a dark YUV420 frame

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info};

use crate::capture::platform::{
    CameraDevice, CameraEvent, CameraPlatform, CaptureRequest, EventSink, PlatformError,
    SessionHandle,
};
use crate::capture::surface::ImageSurface;
use crate::utils::{join_with_deadline, monotonic_nanos};

const LUMA_BACKGROUND: u8 = 16;
const LUMA_SQUARE: u8 = 235;
const CHROMA_NEUTRAL: u8 = 128;

/// Camera platform that fabricates frames, always available.
#[derive(Debug, Clone)]
pub struct SyntheticCamera {
    fps: u32,
    open_delay: Duration,
}

impl SyntheticCamera {
    pub fn new(fps: u32) -> Self {
        Self {
            fps: fps.max(1),
            open_delay: Duration::from_millis(10),
        }
    }

    /// Delay before the device reports opened.
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }
}

impl CameraPlatform for SyntheticCamera {
    fn open_device(&self, device_id: &str, events: EventSink) -> Result<(), PlatformError> {
        let device = SyntheticDevice {
            id: device_id.to_owned(),
            fps: self.fps,
        };
        let delay = self.open_delay;
        thread::Builder::new()
            .name("synthetic-open".into())
            .spawn(move || {
                thread::sleep(delay);
                events.post(CameraEvent::Opened(Box::new(device)));
            })
            .map(drop)
            .map_err(|e| PlatformError(e.to_string()))
    }
}

struct SyntheticDevice {
    id: String,
    fps: u32,
}

impl CameraDevice for SyntheticDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn create_session(
        &mut self,
        _surface: &ImageSurface,
        events: EventSink,
    ) -> Result<(), PlatformError> {
        events.post(CameraEvent::Configured(Box::new(SyntheticSession {
            fps: self.fps,
            stream: None,
        })));
        Ok(())
    }

    fn close(&mut self) {
        debug!(device = %self.id, "synthetic device closed");
    }
}

struct SyntheticSession {
    fps: u32,
    stream: Option<(Arc<AtomicBool>, JoinHandle<()>)>,
}

impl SessionHandle for SyntheticSession {
    fn set_repeating_capture(
        &mut self,
        request: &CaptureRequest,
        events: EventSink,
    ) -> Result<(), PlatformError> {
        let surface = request
            .targets
            .first()
            .cloned()
            .ok_or_else(|| PlatformError("capture request has no target surface".into()))?;
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let interval = Duration::from_secs(1) / self.fps;
        let handle = thread::Builder::new()
            .name("synthetic-stream".into())
            .spawn(move || stream(&surface, &events, &flag, interval))
            .map_err(|e| PlatformError(e.to_string()))?;
        self.stream = Some((stop, handle));
        Ok(())
    }

    fn close(&mut self) {
        if let Some((stop, handle)) = self.stream.take() {
            stop.store(true, Ordering::Relaxed);
            join_with_deadline(handle, Duration::from_secs(1));
        }
    }
}

fn stream(surface: &ImageSurface, events: &EventSink, stop: &AtomicBool, interval: Duration) {
    let (width, height) = (surface.width(), surface.height());
    info!(width, height, "synthetic stream started");
    let mut frame_number = 0u64;
    while !stop.load(Ordering::Relaxed) && events.is_connected() && !surface.is_closed() {
        if surface.try_push(test_pattern(width, height, frame_number), monotonic_nanos()) {
            events.post(CameraEvent::ImageAvailable);
        }
        events.post(CameraEvent::CaptureCompleted { frame_number });
        frame_number += 1;
        thread::sleep(interval);
    }
    debug!(frame_number, "synthetic stream stopped");
}

/// Luma and interleaved chroma planes with a square a quarter of the height wide.
pub fn test_pattern(width: u32, height: u32, frame_number: u64) -> Vec<Bytes> {
    let (w, h) = (width as usize, height as usize);
    let side = (h / 4).max(1).min(w.max(1));
    let travel = w.saturating_sub(side).max(1);
    let left = (frame_number as usize * 8) % travel;
    let top = h.saturating_sub(side) / 2;

    let mut luma = vec![LUMA_BACKGROUND; w * h];
    for row in luma.chunks_exact_mut(w.max(1)).skip(top).take(side) {
        let end = (left + side).min(row.len());
        row[left.min(end)..end].fill(LUMA_SQUARE);
    }
    let chroma = vec![CHROMA_NEUTRAL; w * h / 2];
    vec![Bytes::from(luma), Bytes::from(chroma)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::PixelFormat;

    #[test]
    fn pattern_has_yuv420_geometry() {
        let planes = test_pattern(64, 32, 3);
        assert_eq!(planes[0].len(), 64 * 32);
        assert_eq!(planes[1].len(), 64 * 32 / 2);
        let total: usize = planes.iter().map(|p| p.len()).sum();
        assert_eq!(Some(total), PixelFormat::Yuv420.frame_len(64, 32));
    }

    #[test]
    fn pattern_contains_the_square() {
        let planes = test_pattern(64, 32, 0);
        let bright = planes[0].iter().filter(|&&y| y == LUMA_SQUARE).count();
        assert_eq!(bright, 8 * 8);
    }

    #[test]
    fn degenerate_sizes_do_not_panic() {
        for (w, h) in [(1, 1), (2, 1), (1, 8), (0, 0)] {
            let planes = test_pattern(w, h, 99);
            assert_eq!(planes[0].len(), (w * h) as usize);
        }
    }
}
