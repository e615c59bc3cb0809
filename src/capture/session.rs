//! Camera device/session lifecycle
//!
//! ```text
//! Closed --open--> Opening --Opened--> Configuring --Configured--> Streaming
//! Streaming --close--> Closing --teardown--> Closed
//! Opening | Configuring | Streaming --Disconnected/Error--> Closed
//! ```
//!
//! All platform callbacks are drained on one background thread per open
//! session. Device-handle transitions are serialized by an exclusive
//! open-lock, held from `open` until the device reports back.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, instrument, trace, warn};

use crate::capture::frame::PixelFormat;
use crate::capture::platform::{
    CameraDevice, CameraEvent, CameraPlatform, CaptureRequest, EventSink, Message, SessionHandle,
};
use crate::capture::surface::ImageSurface;
use crate::capture::FrameSink;
use crate::error::{Error, Result};
use crate::utils::{join_with_deadline, lock};
use crate::CaptureConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Opening,
    Configuring,
    Streaming,
    Closing,
}

/// Called on the background thread when a session fails on its own.
pub type FailureHook = Arc<dyn Fn(Error) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub open_timeout: Duration,
    pub max_images: usize,
    pub format: PixelFormat,
    pub join_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            open_timeout: Duration::from_millis(2_500),
            max_images: 2,
            format: PixelFormat::Yuv420,
            join_timeout: Duration::from_secs(2),
        }
    }
}

impl SessionOptions {
    pub fn from_config(capture: &CaptureConfig, join_timeout: Duration) -> Self {
        Self {
            open_timeout: capture.open_timeout(),
            max_images: capture.max_images,
            join_timeout,
            ..Self::default()
        }
    }
}

/// Binary semaphore guarding device open/close transitions.
///
/// Unlike a mutex guard, an [`OpenPermit`] may be released from another
/// thread, which is how a device callback ends an open attempt.
#[derive(Clone, Default)]
pub struct OpenLock {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl OpenLock {
    pub fn try_acquire_for(&self, timeout: Duration) -> Option<OpenPermit> {
        let (held, released) = &*self.inner;
        let guard = lock(held);
        let (mut guard, _) = released
            .wait_timeout_while(guard, timeout, |held| *held)
            .unwrap_or_else(PoisonError::into_inner);
        if *guard {
            return None;
        }
        *guard = true;
        Some(OpenPermit { lock: self.clone() })
    }

    pub fn acquire(&self) -> OpenPermit {
        let (held, released) = &*self.inner;
        let guard = lock(held);
        let mut guard = released
            .wait_while(guard, |held| *held)
            .unwrap_or_else(PoisonError::into_inner);
        *guard = true;
        OpenPermit { lock: self.clone() }
    }

    pub fn is_available(&self) -> bool {
        !*lock(&self.inner.0)
    }

    fn release(&self) {
        let (held, released) = &*self.inner;
        *lock(held) = false;
        released.notify_one();
    }
}

/// Exclusive access to device transitions; released on drop.
pub struct OpenPermit {
    lock: OpenLock,
}

impl Drop for OpenPermit {
    fn drop(&mut self) {
        self.lock.release();
    }
}

struct Inner {
    state: SessionState,
    device_id: String,
    /// Held from `open` until the device reports opened, disconnected or error
    pending_permit: Option<OpenPermit>,
    device: Option<Box<dyn CameraDevice>>,
    session: Option<Box<dyn SessionHandle>>,
    surface: Option<ImageSurface>,
    request: Option<CaptureRequest>,
    events: Option<EventSink>,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: SessionState::Closed,
            device_id: String::new(),
            pending_permit: None,
            device: None,
            session: None,
            surface: None,
            request: None,
            events: None,
        }
    }

    /// Take the platform handles out, leaving nothing to deliver into.
    fn detach(&mut self) -> Detached {
        self.request = None;
        self.events = None;
        Detached {
            session: self.session.take(),
            device: self.device.take(),
            surface: self.surface.take(),
        }
    }

    fn teardown(&mut self) {
        self.detach().close();
    }
}

/// Handles removed from a session, closed outside its lock.
struct Detached {
    session: Option<Box<dyn SessionHandle>>,
    device: Option<Box<dyn CameraDevice>>,
    surface: Option<ImageSurface>,
}

impl Detached {
    /// Close session, device and surface, in that order.
    fn close(self) {
        if let Some(mut session) = self.session {
            session.close();
        }
        if let Some(mut device) = self.device {
            device.close();
        }
        if let Some(surface) = self.surface {
            surface.close();
        }
    }
}

struct Shared {
    inner: Mutex<Inner>,
    changed: Condvar,
    sink: Arc<dyn FrameSink>,
    on_failure: Option<FailureHook>,
}

struct Worker {
    handle: JoinHandle<()>,
    tx: flume::Sender<Message>,
}

/// Owns one camera device and its capture session.
pub struct CaptureSession {
    platform: Arc<dyn CameraPlatform>,
    options: SessionOptions,
    open_lock: OpenLock,
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl CaptureSession {
    pub fn new(
        platform: Arc<dyn CameraPlatform>,
        sink: Arc<dyn FrameSink>,
        options: SessionOptions,
    ) -> Self {
        Self::build(platform, sink, options, None)
    }

    /// Like [`CaptureSession::new`], reporting device and configuration
    /// failures to `on_failure` as they happen.
    pub fn with_failure_hook(
        platform: Arc<dyn CameraPlatform>,
        sink: Arc<dyn FrameSink>,
        options: SessionOptions,
        on_failure: FailureHook,
    ) -> Self {
        Self::build(platform, sink, options, Some(on_failure))
    }

    fn build(
        platform: Arc<dyn CameraPlatform>,
        sink: Arc<dyn FrameSink>,
        options: SessionOptions,
        on_failure: Option<FailureHook>,
    ) -> Self {
        Self {
            platform,
            options,
            open_lock: OpenLock::default(),
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::new()),
                changed: Condvar::new(),
                sink,
                on_failure,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Start opening `device_id`; frames flow to the sink once the device is
    /// opened and the session configured.
    #[instrument(skip(self))]
    pub fn open(&self, device_id: &str, width: u32, height: u32) -> Result<()> {
        let permit = self
            .open_lock
            .try_acquire_for(self.options.open_timeout)
            .ok_or(Error::ResourceBusy {
                timeout: self.options.open_timeout,
            })?;

        if self.state() != SessionState::Closed {
            return Err(Error::AlreadyOpen);
        }
        // A session that failed on its own leaves its background thread behind.
        self.stop_worker();

        let (tx, rx) = flume::unbounded();
        let events = EventSink::new(tx.clone());
        let surface = ImageSurface::new(width, height, self.options.format, self.options.max_images);

        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("camera-background".into())
            .spawn(move || shared.run(rx))
            .map_err(|source| Error::Spawn {
                name: "camera-background",
                source,
            })?;
        *lock(&self.worker) = Some(Worker { handle, tx });

        {
            let mut inner = lock(&self.shared.inner);
            inner.state = SessionState::Opening;
            inner.device_id = device_id.to_owned();
            inner.surface = Some(surface);
            inner.events = Some(events.clone());
            inner.pending_permit = Some(permit);
        }
        self.shared.changed.notify_all();
        info!(device_id, width, height, "opening camera");

        if let Err(err) = self.platform.open_device(device_id, events) {
            {
                let mut inner = lock(&self.shared.inner);
                inner.teardown();
                inner.pending_permit = None;
                inner.state = SessionState::Closed;
            }
            self.shared.changed.notify_all();
            self.stop_worker();
            return Err(Error::Device {
                device_id: device_id.to_owned(),
                reason: err.to_string(),
            });
        }
        Ok(())
    }

    /// Tear down session, device and surface. Idempotent, and safe to call
    /// when never opened. Blocks while an open attempt is still in flight.
    #[instrument(skip(self))]
    pub fn close(&self) {
        let _permit = self.open_lock.acquire();
        let (was, detached) = {
            let mut inner = lock(&self.shared.inner);
            let was = inner.state;
            if was != SessionState::Closed {
                inner.state = SessionState::Closing;
            }
            inner.pending_permit = None;
            (was, inner.detach())
        };
        self.shared.changed.notify_all();
        // Callbacks arriving meanwhile see Closing and back off.
        detached.close();
        lock(&self.shared.inner).state = SessionState::Closed;
        self.shared.changed.notify_all();
        self.stop_worker();
        if was != SessionState::Closed {
            info!(from = ?was, "camera closed");
        }
    }

    fn stop_worker(&self) {
        let Some(worker) = lock(&self.worker).take() else {
            return;
        };
        let _ = worker.tx.send(Message::Shutdown);
        join_with_deadline(worker.handle, self.options.join_timeout);
    }

    pub fn state(&self) -> SessionState {
        lock(&self.shared.inner).state
    }

    /// Block until the session reaches `target` or `timeout` passes.
    pub fn wait_for_state(&self, target: SessionState, timeout: Duration) -> bool {
        let inner = lock(&self.shared.inner);
        let (inner, _) = self
            .shared
            .changed
            .wait_timeout_while(inner, timeout, |inner| inner.state != target)
            .unwrap_or_else(PoisonError::into_inner);
        inner.state == target
    }

    pub fn device_id(&self) -> String {
        lock(&self.shared.inner).device_id.clone()
    }

    pub fn has_device(&self) -> bool {
        lock(&self.shared.inner).device.is_some()
    }

    pub fn has_session(&self) -> bool {
        lock(&self.shared.inner).session.is_some()
    }

    pub fn open_lock(&self) -> &OpenLock {
        &self.open_lock
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl Shared {
    fn run(&self, rx: flume::Receiver<Message>) {
        debug!("camera background thread started");
        while let Ok(message) = rx.recv() {
            match message {
                Message::Event(event) => self.handle(event),
                Message::Shutdown => break,
            }
        }
        for message in rx.try_iter() {
            if let Message::Event(event) = message {
                event.discard();
            }
        }
        debug!("camera background thread stopped");
    }

    fn handle(&self, event: CameraEvent) {
        trace!(?event, "camera event");
        match event {
            CameraEvent::Opened(device) => self.on_opened(device),
            CameraEvent::Disconnected => self.on_device_lost("disconnected".into()),
            CameraEvent::Error(code) => self.on_device_lost(format!("error code {code}")),
            CameraEvent::Configured(session) => self.on_configured(session),
            CameraEvent::ConfigureFailed(reason) => self.on_configure_failed(reason),
            CameraEvent::CaptureProgressed { .. } => {
                metrics::counter!("camera_captures_progressed").increment(1);
            }
            CameraEvent::CaptureCompleted { .. } => {
                metrics::counter!("camera_captures_completed").increment(1);
            }
            CameraEvent::ImageAvailable => self.on_image_available(),
        }
    }

    fn on_opened(&self, mut device: Box<dyn CameraDevice>) {
        let mut inner = lock(&self.inner);
        let (Some(permit), Some(surface), Some(events)) = (
            inner.pending_permit.take(),
            inner.surface.clone(),
            inner.events.clone(),
        ) else {
            drop(inner);
            warn!(device = device.id(), "device opened after its open attempt ended");
            device.close();
            return;
        };

        inner.state = SessionState::Configuring;
        inner.request = Some(CaptureRequest::preview(surface.clone()));
        let configured = device.create_session(&surface, events);
        info!(device = device.id(), "camera opened, configuring preview session");
        inner.device = Some(device);
        drop(permit);

        let failure = configured.err().map(|err| {
            inner.teardown();
            inner.state = SessionState::Closed;
            Error::Configuration(err.to_string())
        });
        drop(inner);
        self.changed.notify_all();
        if let Some(err) = failure {
            self.report(err);
        }
    }

    fn on_device_lost(&self, reason: String) {
        let mut inner = lock(&self.inner);
        let was = inner.state;
        let released = inner.pending_permit.take().is_some();
        if was == SessionState::Closing
            || (was == SessionState::Closed && inner.device.is_none())
        {
            debug!(%reason, "device lost while closing or after close");
            return;
        }
        inner.teardown();
        inner.state = SessionState::Closed;
        let device_id = inner.device_id.clone();
        drop(inner);
        self.changed.notify_all();

        warn!(%device_id, from = ?was, released, %reason, "camera device lost");
        self.report(Error::Device { device_id, reason });
    }

    fn on_configured(&self, mut session: Box<dyn SessionHandle>) {
        let mut inner = lock(&self.inner);
        // The device may have been closed while configuration was in flight.
        if inner.device.is_none() || inner.state != SessionState::Configuring {
            drop(inner);
            debug!("session configured after device closed, discarding it");
            session.close();
            return;
        }
        let (Some(request), Some(events)) = (inner.request.clone(), inner.events.clone()) else {
            drop(inner);
            session.close();
            return;
        };

        let failure = match session.set_repeating_capture(&request, events) {
            Ok(()) => {
                inner.session = Some(session);
                inner.state = SessionState::Streaming;
                info!(device_id = %inner.device_id, "camera streaming");
                None
            }
            Err(err) => {
                session.close();
                inner.teardown();
                inner.state = SessionState::Closed;
                Some(Error::Configuration(err.to_string()))
            }
        };
        drop(inner);
        self.changed.notify_all();
        if let Some(err) = failure {
            self.report(err);
        }
    }

    fn on_configure_failed(&self, reason: String) {
        let mut inner = lock(&self.inner);
        if inner.state != SessionState::Configuring {
            debug!(%reason, "ignoring configure failure outside configuration");
            return;
        }
        inner.teardown();
        inner.state = SessionState::Closed;
        drop(inner);
        self.changed.notify_all();
        self.report(Error::Configuration(reason));
    }

    fn on_image_available(&self) {
        let surface = {
            let inner = lock(&self.inner);
            if inner.state != SessionState::Streaming {
                return;
            }
            inner.surface.clone()
        };
        let Some(image) = surface.and_then(|s| s.acquire_latest()) else {
            trace!("image notification with nothing to acquire");
            return;
        };
        image.with_view(|view| self.sink.deliver(view));
        drop(image);
    }

    fn report(&self, err: Error) {
        error!("camera session failed: {err}");
        if let Some(hook) = &self.on_failure {
            hook(err);
        }
    }
}
