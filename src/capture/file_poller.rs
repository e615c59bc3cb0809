//! Still-image source: re-reads a fixed path on an interval

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use arc_swap::ArcSwap;
use tracing::{debug, info, warn};

use crate::capture::decoder::decode_file;
use crate::capture::frame::{FrameView, PixelFormat};
use crate::capture::FrameSink;
use crate::error::{Error, Result};
use crate::utils::{join_with_deadline, monotonic_nanos, CancelToken};
use crate::Config;

/// Receives the poller's frames and its fatal condition.
pub trait PollListener: FrameSink {
    /// The image could not be read; the loop has stopped.
    fn on_missing(&self, err: Error);
}

/// Handle to a running poll loop.
pub struct FilePoller {
    cancel: CancelToken,
    handle: Option<JoinHandle<()>>,
    join_timeout: Duration,
}

impl FilePoller {
    /// Spawn the poll loop. Path and interval are re-read from `config` every cycle.
    pub fn start(
        config: Arc<ArcSwap<Config>>,
        listener: Arc<dyn PollListener>,
        join_timeout: Duration,
    ) -> Result<Self> {
        let cancel = CancelToken::default();
        let token = cancel.clone();
        let handle = thread::Builder::new()
            .name("image-poller".into())
            .spawn(move || poll_loop(&config, listener.as_ref(), &token))
            .map_err(|source| Error::Spawn {
                name: "image-poller",
                source,
            })?;

        Ok(Self {
            cancel,
            handle: Some(handle),
            join_timeout,
        })
    }

    /// Request the loop to stop and wait for it, up to the join deadline.
    pub fn stop(&mut self) -> bool {
        self.cancel.cancel();
        match self.handle.take() {
            Some(handle) => join_with_deadline(handle, self.join_timeout),
            None => true,
        }
    }

    /// Whether the loop is still cycling
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for FilePoller {
    fn drop(&mut self) {
        self.stop();
    }
}

fn poll_loop(config: &ArcSwap<Config>, listener: &dyn PollListener, cancel: &CancelToken) {
    info!("image poller started");
    let mut cycles = 0u64;
    while !cancel.is_cancelled() {
        let settings = config.load().image.clone();
        let image = match decode_file(&settings.path) {
            Ok(image) => image,
            Err(err) => {
                warn!(path = %settings.path.display(), "image unavailable, stopping poller: {err}");
                listener.on_missing(err);
                return;
            }
        };

        let (width, height) = image.dimensions();
        let planes = [image.as_raw().as_slice()];
        listener.deliver(&FrameView {
            planes: &planes,
            width,
            height,
            format: PixelFormat::Rgba,
            timestamp: monotonic_nanos(),
        });
        cycles += 1;
        debug!(cycles, width, height, "polled image");

        if cancel.sleep(settings.poll_interval()) {
            break;
        }
    }
    info!(cycles, "image poller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        frames: Mutex<Vec<(u32, u32, usize)>>,
        missing: Mutex<Vec<String>>,
    }

    impl FrameSink for Recorder {
        fn deliver(&self, frame: &FrameView<'_>) {
            let len = frame.planes.iter().map(|p| p.len()).sum();
            self.frames.lock().unwrap().push((frame.width, frame.height, len));
        }
    }

    impl PollListener for Recorder {
        fn on_missing(&self, err: Error) {
            self.missing.lock().unwrap().push(err.to_string());
        }
    }

    fn config_for(path: &std::path::Path) -> Arc<ArcSwap<Config>> {
        let mut config = Config::default();
        config.image.path = path.to_owned();
        config.image.poll_interval_ms = 5;
        Arc::new(ArcSwap::from_pointee(config))
    }

    #[test]
    fn missing_file_reports_once_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let mut poller = FilePoller::start(
            config_for(&dir.path().join("absent.jpeg")),
            recorder.clone(),
            Duration::from_secs(2),
        )
        .unwrap();

        for _ in 0..200 {
            if !poller.is_running() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!poller.is_running());
        assert!(poller.stop());
        assert_eq!(recorder.missing.lock().unwrap().len(), 1);
        assert!(recorder.frames.lock().unwrap().is_empty());
    }

    #[test]
    fn polls_until_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        image::RgbaImage::new(4, 2).save(&path).unwrap();

        let recorder = Arc::new(Recorder::default());
        let mut poller =
            FilePoller::start(config_for(&path), recorder.clone(), Duration::from_secs(2)).unwrap();
        for _ in 0..200 {
            if recorder.frames.lock().unwrap().len() >= 3 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(poller.stop());
        assert!(!poller.is_running());

        let frames = recorder.frames.lock().unwrap();
        assert!(frames.len() >= 3);
        assert!(frames.iter().all(|&f| f == (4, 2, 32)));
        assert!(recorder.missing.lock().unwrap().is_empty());
    }
}
