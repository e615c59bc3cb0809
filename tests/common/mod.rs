#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use framewatch::capture::platform::{CaptureRequest, PlatformError};
use framewatch::capture::{
    CameraDevice, CameraEvent, CameraPlatform, EventSink, FrameSink, FrameView, ImageSurface,
    SessionHandle,
};
use framewatch::{DetectionResult, FrameSnapshot, NormalizedRect, Notice, Renderer};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

#[derive(Default)]
struct Script {
    open_requests: Mutex<Vec<(String, EventSink)>>,
    session_events: Mutex<Option<EventSink>>,
    streaming: Mutex<Option<(ImageSurface, EventSink)>>,
    refuse_open: AtomicBool,
    devices_closed: AtomicUsize,
    sessions_closed: AtomicUsize,
}

/// Camera platform driven by the test: every callback fires only when the
/// test asks for it.
#[derive(Clone, Default)]
pub struct ScriptedPlatform {
    script: Arc<Script>,
}

impl ScriptedPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse_open(&self, refuse: bool) {
        self.script.refuse_open.store(refuse, Ordering::SeqCst);
    }

    pub fn open_requests(&self) -> usize {
        self.script.open_requests.lock().unwrap().len()
    }

    fn open_sink(&self) -> EventSink {
        assert!(
            wait_until(TIMEOUT, || self.open_requests() > 0),
            "no open request reached the platform"
        );
        let requests = self.script.open_requests.lock().unwrap();
        requests.last().unwrap().1.clone()
    }

    /// Events sink of the most recent session configuration request.
    pub fn session_sink(&self) -> EventSink {
        assert!(
            wait_until(TIMEOUT, || self
                .script
                .session_events
                .lock()
                .unwrap()
                .is_some()),
            "no session was requested"
        );
        self.script.session_events.lock().unwrap().clone().unwrap()
    }

    pub fn report_opened(&self) {
        let (id, sink) = {
            self.open_sink();
            let requests = self.script.open_requests.lock().unwrap();
            requests.last().cloned().unwrap()
        };
        sink.post(CameraEvent::Opened(Box::new(ScriptedDevice {
            id,
            script: self.script.clone(),
        })));
    }

    pub fn report_device_error(&self, code: i32) {
        self.open_sink().post(CameraEvent::Error(code));
    }

    pub fn report_disconnected(&self) {
        self.open_sink().post(CameraEvent::Disconnected);
    }

    pub fn report_configured(&self) {
        self.session_sink()
            .post(CameraEvent::Configured(self.session_handle()));
    }

    pub fn report_configure_failed(&self, reason: &str) {
        self.session_sink()
            .post(CameraEvent::ConfigureFailed(reason.to_owned()));
    }

    /// A session handle that has not been handed to anyone yet.
    pub fn session_handle(&self) -> Box<dyn SessionHandle> {
        Box::new(ScriptedSession {
            script: self.script.clone(),
        })
    }

    /// Land a YUV420 image filled with `value` on the streaming surface and
    /// notify the session. Returns whether the surface accepted it.
    pub fn push_frame(&self, value: u8) -> bool {
        let (surface, events) = self.streaming().expect("no repeating capture running");
        let accepted = self.land_image(&surface, value);
        events.post(CameraEvent::ImageAvailable);
        accepted
    }

    /// Land an image without notifying the session.
    pub fn land_frame(&self, value: u8) -> bool {
        let (surface, _) = self.streaming().expect("no repeating capture running");
        self.land_image(&surface, value)
    }

    pub fn notify_image_available(&self) {
        let (_, events) = self.streaming().expect("no repeating capture running");
        events.post(CameraEvent::ImageAvailable);
    }

    fn land_image(&self, surface: &ImageSurface, value: u8) -> bool {
        let luma = (surface.width() * surface.height()) as usize;
        let planes = vec![
            Bytes::from(vec![value; luma]),
            Bytes::from(vec![value; luma / 2]),
        ];
        surface.try_push(planes, 0)
    }

    pub fn streaming(&self) -> Option<(ImageSurface, EventSink)> {
        self.script.streaming.lock().unwrap().clone()
    }

    pub fn wait_streaming(&self) -> bool {
        wait_until(TIMEOUT, || self.streaming().is_some())
    }

    pub fn devices_closed(&self) -> usize {
        self.script.devices_closed.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> usize {
        self.script.sessions_closed.load(Ordering::SeqCst)
    }
}

impl CameraPlatform for ScriptedPlatform {
    fn open_device(&self, device_id: &str, events: EventSink) -> Result<(), PlatformError> {
        if self.script.refuse_open.load(Ordering::SeqCst) {
            return Err(PlatformError(format!("camera {device_id} is not present")));
        }
        *self.script.session_events.lock().unwrap() = None;
        *self.script.streaming.lock().unwrap() = None;
        self.script
            .open_requests
            .lock()
            .unwrap()
            .push((device_id.to_owned(), events));
        Ok(())
    }
}

struct ScriptedDevice {
    id: String,
    script: Arc<Script>,
}

impl CameraDevice for ScriptedDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn create_session(
        &mut self,
        _surface: &ImageSurface,
        events: EventSink,
    ) -> Result<(), PlatformError> {
        *self.script.session_events.lock().unwrap() = Some(events);
        Ok(())
    }

    fn close(&mut self) {
        self.script.devices_closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct ScriptedSession {
    script: Arc<Script>,
}

impl SessionHandle for ScriptedSession {
    fn set_repeating_capture(
        &mut self,
        request: &CaptureRequest,
        events: EventSink,
    ) -> Result<(), PlatformError> {
        let surface = request
            .targets
            .first()
            .cloned()
            .ok_or_else(|| PlatformError("no target".into()))?;
        *self.script.streaming.lock().unwrap() = Some((surface, events));
        Ok(())
    }

    fn close(&mut self) {
        *self.script.streaming.lock().unwrap() = None;
        self.script.sessions_closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Sink remembering (width, height, first byte, length) of every delivery.
#[derive(Default)]
pub struct RecordingSink {
    pub frames: Mutex<Vec<(u32, u32, u8, usize)>>,
}

impl RecordingSink {
    pub fn count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }
}

impl FrameSink for RecordingSink {
    fn deliver(&self, frame: &FrameView<'_>) {
        let first = frame
            .planes
            .iter()
            .find_map(|p| p.first().copied())
            .unwrap_or(0);
        let len = frame.planes.iter().map(|p| p.len()).sum();
        self.frames
            .lock()
            .unwrap()
            .push((frame.width, frame.height, first, len));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Presented {
    pub sequence: Option<u64>,
    pub first_byte: Option<u8>,
    pub rects: Vec<NormalizedRect>,
}

/// Renderer that records every presentation and notice.
#[derive(Clone, Default)]
pub struct RecordingRenderer {
    pub presented: Arc<Mutex<Vec<Presented>>>,
    pub notices: Arc<Mutex<Vec<Notice>>>,
}

impl RecordingRenderer {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<Presented> {
        self.presented.lock().unwrap().last().cloned()
    }
}

impl Renderer for RecordingRenderer {
    fn present(&mut self, frame: Option<&FrameSnapshot>, rects: &[NormalizedRect]) {
        self.presented.lock().unwrap().push(Presented {
            sequence: frame.map(|f| f.sequence),
            first_byte: frame.and_then(|f| f.data.first().copied()),
            rects: rects.to_vec(),
        });
    }

    fn notice(&mut self, notice: &Notice) {
        self.notices.lock().unwrap().push(notice.clone());
    }
}

/// Detector that labels its single full-frame box with the frame's first byte.
pub fn tagging_detector(
) -> impl FnMut(&[u8], i32, u32, u32) -> Result<Vec<DetectionResult>, framewatch::error::DetectorError>
       + Send {
    |buffer: &[u8],
     _code: i32,
     width: u32,
     height: u32|
     -> Result<Vec<DetectionResult>, framewatch::error::DetectorError> {
        thread::sleep(Duration::from_millis(1));
        let tag = buffer.first().copied().unwrap_or(0);
        Ok(vec![
            DetectionResult::new(0.0, 0.0, width as f32, height as f32).with_label(tag.to_string())
        ])
    }
}
