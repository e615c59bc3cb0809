//! V4L2 camera platform, YUV420 over memory-mapped buffers

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use tracing::{info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::platform::{
    CameraDevice, CameraEvent, CameraPlatform, CaptureRequest, EventSink, PlatformError,
    SessionHandle,
};
use crate::capture::surface::ImageSurface;
use crate::utils::{join_with_deadline, monotonic_nanos};

/// Buffers requested from the driver
const BUFFER_COUNT: u32 = 4;
/// Raised to the session as `CameraEvent::Error` when the device cannot be opened
const ERROR_OPEN_FAILED: i32 = 1;
const ERROR_NO_CAPTURE: i32 = 2;

/// Resolve a camera id to a device node: `"0"` is `/dev/video0`.
pub fn device_path(device_id: &str) -> String {
    if device_id.chars().all(|c| c.is_ascii_digit()) && !device_id.is_empty() {
        format!("/dev/video{device_id}")
    } else {
        device_id.to_owned()
    }
}

/// V4L2 backed camera platform
#[derive(Debug, Default, Clone)]
pub struct V4l2Camera;

impl CameraPlatform for V4l2Camera {
    fn open_device(&self, device_id: &str, events: EventSink) -> Result<(), PlatformError> {
        let path = device_path(device_id);
        if !Path::new(&path).exists() {
            return Err(PlatformError(format!("{path} does not exist")));
        }
        let id = device_id.to_owned();
        thread::Builder::new()
            .name("v4l2-open".into())
            .spawn(move || match open(&path) {
                Ok(device) => events.post(CameraEvent::Opened(Box::new(V4l2Device { id, device }))),
                Err(code) => events.post(CameraEvent::Error(code)),
            })
            .map(drop)
            .map_err(|e| PlatformError(e.to_string()))
    }
}

fn open(path: &str) -> Result<Device, i32> {
    let device = Device::with_path(path).map_err(|e| {
        warn!(path, "failed to open device: {e}");
        ERROR_OPEN_FAILED
    })?;
    let caps = device.query_caps().map_err(|_| ERROR_OPEN_FAILED)?;
    info!("Device: {} ({})", caps.card, caps.driver);
    if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
        return Err(ERROR_NO_CAPTURE);
    }
    Ok(device)
}

struct V4l2Device {
    id: String,
    device: Device,
}

impl CameraDevice for V4l2Device {
    fn id(&self) -> &str {
        &self.id
    }

    #[instrument(skip_all, fields(device = %self.id))]
    fn create_session(
        &mut self,
        surface: &ImageSurface,
        events: EventSink,
    ) -> Result<(), PlatformError> {
        let mut fmt = self
            .device
            .format()
            .map_err(|e| PlatformError(e.to_string()))?;
        fmt.width = surface.width();
        fmt.height = surface.height();
        fmt.fourcc = FourCC::new(b"YU12");

        let actual = match self.device.set_format(&fmt) {
            Ok(actual) => actual,
            Err(e) => {
                events.post(CameraEvent::ConfigureFailed(e.to_string()));
                return Ok(());
            }
        };
        if actual.width != fmt.width || actual.height != fmt.height || actual.fourcc != fmt.fourcc
        {
            events.post(CameraEvent::ConfigureFailed(format!(
                "driver negotiated {}x{} {}",
                actual.width, actual.height, actual.fourcc
            )));
            return Ok(());
        }

        match MmapStream::with_buffers(&self.device, Type::VideoCapture, BUFFER_COUNT) {
            Ok(stream) => {
                info!("Capture stream configured with {} buffers", BUFFER_COUNT);
                events.post(CameraEvent::Configured(Box::new(V4l2Session {
                    stream: Some(stream),
                    worker: None,
                })));
            }
            Err(e) => events.post(CameraEvent::ConfigureFailed(e.to_string())),
        }
        Ok(())
    }

    fn close(&mut self) {
        info!(device = %self.id, "device closed");
    }
}

struct V4l2Session {
    stream: Option<MmapStream<'static>>,
    worker: Option<(Arc<AtomicBool>, JoinHandle<()>)>,
}

impl SessionHandle for V4l2Session {
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
        let mut stream = self
            .stream
            .take()
            .ok_or_else(|| PlatformError("stream already running".into()))?;

        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = thread::Builder::new()
            .name("v4l2-stream".into())
            .spawn(move || {
                while !flag.load(Ordering::Relaxed) && !surface.is_closed() {
                    let (buf, meta) = match stream.next() {
                        Ok(next) => next,
                        Err(e) => {
                            warn!("dequeue failed: {e}");
                            events.post(CameraEvent::Error(e.raw_os_error().unwrap_or(-1)));
                            break;
                        }
                    };
                    let planes = vec![Bytes::copy_from_slice(buf)];
                    if surface.try_push(planes, monotonic_nanos()) {
                        events.post(CameraEvent::ImageAvailable);
                    }
                    events.post(CameraEvent::CaptureCompleted {
                        frame_number: u64::from(meta.sequence),
                    });
                }
            })
            .map_err(|e| PlatformError(e.to_string()))?;
        self.worker = Some((stop, handle));
        Ok(())
    }

    fn close(&mut self) {
        if let Some((stop, handle)) = self.worker.take() {
            stop.store(true, Ordering::Relaxed);
            join_with_deadline(handle, Duration::from_secs(1));
        }
        self.stream = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_ids_map_to_video_nodes() {
        assert_eq!(device_path("0"), "/dev/video0");
        assert_eq!(device_path("12"), "/dev/video12");
        assert_eq!(device_path("/dev/v4l/by-id/cam"), "/dev/v4l/by-id/cam");
        assert_eq!(device_path(""), "");
    }
}
