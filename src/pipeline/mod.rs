//! Start/stop coordination of sources, detection and presentation
//!
//! Data flow: source -> [`FrameSlot`] -> [`DetectionWorker`] -> [`Output`] -> presenter.

pub mod flags;
pub mod output;
pub mod slot;
pub mod worker;

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use arc_swap::ArcSwap;
use tracing::{info, instrument, warn};

use crate::capture::file_poller::{FilePoller, PollListener};
use crate::capture::frame::FrameView;
use crate::capture::platform::CameraPlatform;
use crate::capture::session::{CaptureSession, FailureHook, SessionOptions, SessionState};
use crate::capture::FrameSink;
use crate::detect::Detector;
use crate::display::{Notice, Poster, Presenter, Renderer};
use crate::error::{Error, Result};
use crate::utils::{join_with_deadline, lock};
use crate::{Config, SourceKind};

pub use flags::{FlagState, PipelineFlags};
pub use output::{Output, OutputSnapshot};
pub use slot::{FrameSlot, SlotStats};
pub use worker::DetectionWorker;

/// State shared with the producers, the worker and the failure hooks
pub(crate) struct Shared {
    pub(crate) flags: PipelineFlags,
    pub(crate) slot: FrameSlot,
    pub(crate) output: Arc<Output>,
    pub(crate) poster: Poster,
}

impl Shared {
    /// Drop the held frame and results so nothing stale renders after a stop.
    fn clear(&self) {
        let epoch = self.slot.reset();
        self.output.clear(epoch);
        self.poster.redraw();
    }

    fn on_camera_failure(&self, err: Error) {
        if !self.flags.disarm_source(SourceKind::Camera) {
            warn!("camera failure after stop: {err}");
            return;
        }
        self.clear();
        let notice = match err {
            Error::Configuration(reason) => Notice::ConfigurationFailed { reason },
            other => Notice::CameraFailed {
                reason: other.to_string(),
            },
        };
        self.poster.notice(notice);
    }
}

impl FrameSink for Shared {
    fn deliver(&self, frame: &FrameView<'_>) {
        match self.slot.write(frame) {
            Ok(_) => metrics::counter!("frames_captured").increment(1),
            Err(err) => warn!("dropping frame: {err}"),
        }
    }
}

impl PollListener for Shared {
    fn on_missing(&self, err: Error) {
        self.flags.disarm_source(SourceKind::Image);
        self.clear();
        let path = match &err {
            Error::SourceUnavailable { path, .. } => path.clone(),
            _ => Default::default(),
        };
        self.poster.notice(Notice::ImageMissing { path });
    }
}

struct Control {
    poller: Option<FilePoller>,
    camera: Option<Arc<CaptureSession>>,
    worker: Option<JoinHandle<()>>,
    presenter: Option<Presenter>,
    shut_down: bool,
}

/// Controller owning both sources, the detection worker and the presenter.
///
/// All start/stop operations serialize on one coordination lock. Starts and
/// stops are idempotent: they return whether anything changed.
pub struct Pipeline {
    config: Arc<ArcSwap<Config>>,
    platform: Arc<dyn CameraPlatform>,
    shared: Arc<Shared>,
    control: Mutex<Control>,
}

impl Pipeline {
    pub fn new(
        config: Config,
        platform: Arc<dyn CameraPlatform>,
        detector: Box<dyn Detector>,
        renderer: Box<dyn Renderer>,
    ) -> Result<Self> {
        let config = Arc::new(ArcSwap::from_pointee(config));
        let output = Arc::new(Output::default());
        let (presenter, poster) = Presenter::start(output.clone(), renderer)?;
        let shared = Arc::new(Shared {
            flags: PipelineFlags::default(),
            slot: FrameSlot::new(),
            output,
            poster,
        });
        let worker = DetectionWorker::new(detector).spawn(shared.clone(), config.clone())?;

        Ok(Self {
            config,
            platform,
            shared,
            control: Mutex::new(Control {
                poller: None,
                camera: None,
                worker: Some(worker),
                presenter: Some(presenter),
                shut_down: false,
            }),
        })
    }

    fn control(&self) -> Result<MutexGuard<'_, Control>> {
        let control = lock(&self.control);
        if control.shut_down {
            return Err(Error::ShutDown);
        }
        Ok(control)
    }

    /// Start polling the configured image file.
    #[instrument(skip(self))]
    pub fn open_image(&self) -> Result<bool> {
        let mut control = self.control()?;
        if !self.shared.flags.arm_source(SourceKind::Image)? {
            return Ok(false);
        }
        reap(&mut control);

        let join_timeout = self.config.load().pipeline.join_timeout();
        match FilePoller::start(self.config.clone(), self.shared.clone(), join_timeout) {
            Ok(poller) => control.poller = Some(poller),
            Err(err) => {
                self.shared.flags.disarm_source(SourceKind::Image);
                return Err(err);
            }
        }
        info!("image source started");
        Ok(true)
    }

    /// Stop polling and clear the displayed frame.
    #[instrument(skip(self))]
    pub fn close_image(&self) -> bool {
        let mut control = lock(&self.control);
        let was_armed = self.shared.flags.disarm_source(SourceKind::Image);
        if let Some(mut poller) = control.poller.take() {
            poller.stop();
        }
        if was_armed {
            self.shared.clear();
            info!("image source stopped");
        }
        was_armed
    }

    /// Open the configured camera. Frames flow once the device reports back.
    #[instrument(skip(self))]
    pub fn open_camera(&self) -> Result<bool> {
        let mut control = self.control()?;
        if !self.shared.flags.arm_source(SourceKind::Camera)? {
            return Ok(false);
        }
        reap(&mut control);

        let config = self.config.load_full();
        let hook: FailureHook = {
            let shared: Weak<Shared> = Arc::downgrade(&self.shared);
            Arc::new(move |err: Error| {
                if let Some(shared) = shared.upgrade() {
                    shared.on_camera_failure(err);
                }
            })
        };
        let session = CaptureSession::with_failure_hook(
            self.platform.clone(),
            self.shared.clone(),
            SessionOptions::from_config(&config.capture, config.pipeline.join_timeout()),
            hook,
        );
        let capture = &config.capture;
        if let Err(err) = session.open(&capture.device_id, capture.width, capture.height) {
            self.shared.flags.disarm_source(SourceKind::Camera);
            return Err(err);
        }
        control.camera = Some(Arc::new(session));
        info!(device_id = %capture.device_id, "camera source started");
        Ok(true)
    }

    /// Close the camera session and clear the displayed frame.
    #[instrument(skip(self))]
    pub fn close_camera(&self) -> bool {
        let mut control = lock(&self.control);
        let was_armed = self.shared.flags.disarm_source(SourceKind::Camera);
        if let Some(session) = control.camera.take() {
            session.close();
        }
        if was_armed {
            self.shared.clear();
            info!("camera source stopped");
        }
        was_armed
    }

    /// Run the detector on every frame from now on. Needs an armed source.
    #[instrument(skip(self))]
    pub fn start_detect(&self) -> Result<bool> {
        let _control = self.control()?;
        let changed = self.shared.flags.arm_detection()?;
        if changed {
            info!("detection started");
        }
        Ok(changed)
    }

    #[instrument(skip(self))]
    pub fn stop_detect(&self) -> bool {
        let _control = lock(&self.control);
        let changed = self.shared.flags.disarm_detection();
        if changed {
            info!("detection stopped");
        }
        changed
    }

    /// Stop both sources, the worker and the presenter. Idempotent; later
    /// starts fail with [`Error::ShutDown`].
    #[instrument(skip(self))]
    pub fn shutdown(&self) {
        let mut control = lock(&self.control);
        if control.shut_down {
            return;
        }
        control.shut_down = true;

        let flags = &self.shared.flags;
        flags.disarm_detection();
        flags.disarm_source(SourceKind::Image);
        flags.disarm_source(SourceKind::Camera);
        reap(&mut control);

        let deadline = self.config.load().pipeline.join_timeout();
        self.shared.slot.close();
        if let Some(worker) = control.worker.take() {
            join_with_deadline(worker, deadline);
        }
        self.shared.clear();
        if let Some(mut presenter) = control.presenter.take() {
            presenter.shutdown(deadline);
        }
        info!("pipeline shut down");
    }

    pub fn flags(&self) -> FlagState {
        self.shared.flags.snapshot()
    }

    /// State of the current camera session, `Closed` when there is none.
    pub fn camera_state(&self) -> SessionState {
        lock(&self.control)
            .camera
            .as_ref()
            .map_or(SessionState::Closed, |session| session.state())
    }

    /// Block until the camera session reaches `target` or `timeout` passes.
    /// Start and stop calls are not held up while waiting.
    pub fn wait_for_camera_state(&self, target: SessionState, timeout: Duration) -> bool {
        let camera = lock(&self.control).camera.clone();
        match camera {
            Some(session) => session.wait_for_state(target, timeout),
            None => target == SessionState::Closed,
        }
    }

    /// The frame and results currently on display.
    pub fn current(&self) -> OutputSnapshot {
        self.shared.output.snapshot()
    }

    pub fn slot_stats(&self) -> SlotStats {
        self.shared.slot.stats()
    }

    /// Swap in a new configuration. The image source picks it up on its next
    /// cycle, the camera on its next open.
    pub fn update_config(&self, config: Config) {
        self.config.store(Arc::new(config));
        info!("configuration updated");
    }

    pub fn config(&self) -> Arc<Config> {
        self.config.load_full()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Stop whatever source handles are still held, armed or not.
fn reap(control: &mut Control) {
    if let Some(mut poller) = control.poller.take() {
        poller.stop();
    }
    if let Some(session) = control.camera.take() {
        session.close();
    }
}
