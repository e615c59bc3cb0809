//! Contract between a [`CaptureSession`](super::CaptureSession) and the platform camera stack.
//!
//! Every platform operation is asynchronous: it returns once the request is
//! issued and reports the outcome later as a [`CameraEvent`] on the
//! [`EventSink`] it was given. Sessions drain that sink on their own
//! background thread, so all callbacks run there.

use std::fmt;

use thiserror::Error;

use crate::capture::surface::ImageSurface;

/// Platform refused a request outright
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct PlatformError(pub String);

/// Opens camera devices by id.
pub trait CameraPlatform: Send + Sync {
    /// Begin opening `device_id`. Reports `Opened`, `Disconnected` or `Error`.
    fn open_device(&self, device_id: &str, events: EventSink) -> Result<(), PlatformError>;
}

/// An opened camera device.
pub trait CameraDevice: Send {
    fn id(&self) -> &str;

    /// Begin configuring a session rendering into `surface`.
    /// Reports `Configured` or `ConfigureFailed`.
    fn create_session(
        &mut self,
        surface: &ImageSurface,
        events: EventSink,
    ) -> Result<(), PlatformError>;

    fn close(&mut self);
}

/// A configured capture session.
pub trait SessionHandle: Send {
    /// Start streaming `request` until closed. Reports capture progress and
    /// `ImageAvailable` whenever an image lands in a target surface.
    fn set_repeating_capture(
        &mut self,
        request: &CaptureRequest,
        events: EventSink,
    ) -> Result<(), PlatformError>;

    fn close(&mut self);
}

/// Asynchronous device and session callbacks
pub enum CameraEvent {
    Opened(Box<dyn CameraDevice>),
    Disconnected,
    Error(i32),
    Configured(Box<dyn SessionHandle>),
    ConfigureFailed(String),
    CaptureProgressed { frame_number: u64 },
    CaptureCompleted { frame_number: u64 },
    ImageAvailable,
}

impl CameraEvent {
    /// Close any handle the event carries.
    pub(crate) fn discard(self) {
        match self {
            CameraEvent::Opened(mut device) => device.close(),
            CameraEvent::Configured(mut session) => session.close(),
            _ => {}
        }
    }
}

impl fmt::Debug for CameraEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraEvent::Opened(device) => write!(f, "Opened({})", device.id()),
            CameraEvent::Disconnected => write!(f, "Disconnected"),
            CameraEvent::Error(code) => write!(f, "Error({code})"),
            CameraEvent::Configured(_) => write!(f, "Configured"),
            CameraEvent::ConfigureFailed(reason) => write!(f, "ConfigureFailed({reason})"),
            CameraEvent::CaptureProgressed { frame_number } => {
                write!(f, "CaptureProgressed({frame_number})")
            }
            CameraEvent::CaptureCompleted { frame_number } => {
                write!(f, "CaptureCompleted({frame_number})")
            }
            CameraEvent::ImageAvailable => write!(f, "ImageAvailable"),
        }
    }
}

pub(crate) enum Message {
    Event(CameraEvent),
    Shutdown,
}

/// Where platform callbacks are posted; cheap to clone.
#[derive(Clone)]
pub struct EventSink {
    tx: flume::Sender<Message>,
}

impl EventSink {
    pub(crate) fn new(tx: flume::Sender<Message>) -> Self {
        Self { tx }
    }

    /// Post an event. An event whose session has already gone away is handed
    /// back so the caller can close any handle it carries.
    pub fn send(&self, event: CameraEvent) -> Result<(), CameraEvent> {
        match self.tx.send(Message::Event(event)) {
            Ok(()) => Ok(()),
            Err(flume::SendError(Message::Event(event))) => Err(event),
            Err(flume::SendError(Message::Shutdown)) => Ok(()),
        }
    }

    /// Post an event, closing its handle if nobody is listening any more.
    pub fn post(&self, event: CameraEvent) {
        if let Err(event) = self.send(event) {
            event.discard();
        }
    }

    pub fn is_connected(&self) -> bool {
        !self.tx.is_disconnected()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestTemplate {
    Preview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoFocusMode {
    Off,
    ContinuousPicture,
}

/// What a repeating capture should produce
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub template: RequestTemplate,
    pub auto_focus: AutoFocusMode,
    pub targets: Vec<ImageSurface>,
}

impl CaptureRequest {
    /// Continuous auto-focus preview into a single surface.
    pub fn preview(target: ImageSurface) -> Self {
        Self {
            template: RequestTemplate::Preview,
            auto_focus: AutoFocusMode::ContinuousPicture,
            targets: vec![target],
        }
    }
}
