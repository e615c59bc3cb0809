pub mod decoder;
pub mod file_poller;
pub mod frame;
pub mod platform;
pub mod session;
pub mod surface;
pub mod synthetic;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use file_poller::{FilePoller, PollListener};
pub use frame::{Fill, Frame, FrameSnapshot, FrameView, PixelFormat};
pub use platform::{CameraDevice, CameraEvent, CameraPlatform, EventSink, SessionHandle};
pub use session::{CaptureSession, SessionOptions, SessionState};
pub use surface::{Image, ImageSurface};
pub use synthetic::SyntheticCamera;

/// Consumer of freshly acquired frames.
///
/// `deliver` runs on the producer's thread and must copy what it needs before
/// returning; the view's memory is released right after.
pub trait FrameSink: Send + Sync {
    fn deliver(&self, frame: &FrameView<'_>);
}
