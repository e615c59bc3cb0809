//! Image-delivery surface shared between a camera backend and its session

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tracing::trace;

use crate::capture::frame::{FrameView, PixelFormat};
use crate::utils::lock;

/// Bounded queue of images a camera backend renders into.
///
/// At most `max_images` images may be queued or held by the consumer at once;
/// further pushes are refused until an [`Image`] is dropped.
#[derive(Clone)]
pub struct ImageSurface {
    inner: Arc<SurfaceInner>,
}

struct SurfaceInner {
    width: u32,
    height: u32,
    format: PixelFormat,
    max_images: usize,
    state: Mutex<SurfaceState>,
}

#[derive(Default)]
struct SurfaceState {
    queued: VecDeque<QueuedImage>,
    outstanding: usize,
    closed: bool,
}

struct QueuedImage {
    planes: Vec<Bytes>,
    timestamp: i64,
}

impl ImageSurface {
    pub fn new(width: u32, height: u32, format: PixelFormat, max_images: usize) -> Self {
        Self {
            inner: Arc::new(SurfaceInner {
                width,
                height,
                format,
                max_images: max_images.max(1),
                state: Mutex::new(SurfaceState::default()),
            }),
        }
    }

    /// Producer side: queue an image. Returns `false` if it was dropped.
    pub fn try_push(&self, planes: Vec<Bytes>, timestamp: i64) -> bool {
        let mut state = lock(&self.inner.state);
        if state.closed || state.queued.len() + state.outstanding >= self.inner.max_images {
            metrics::counter!("surface_frames_dropped").increment(1);
            trace!(timestamp, "surface full, dropping image");
            return false;
        }
        state.queued.push_back(QueuedImage { planes, timestamp });
        true
    }

    /// Consumer side: take the newest queued image, releasing any older ones.
    pub fn acquire_latest(&self) -> Option<Image> {
        let mut state = lock(&self.inner.state);
        let latest = state.queued.pop_back()?;
        let stale = state.queued.len();
        state.queued.clear();
        state.outstanding += 1;
        drop(state);

        if stale > 0 {
            metrics::counter!("surface_frames_skipped").increment(stale as u64);
        }
        Some(Image {
            planes: latest.planes,
            timestamp: latest.timestamp,
            surface: self.inner.clone(),
        })
    }

    /// Refuse further images and drop the queued ones.
    pub fn close(&self) {
        let mut state = lock(&self.inner.state);
        state.closed = true;
        state.queued.clear();
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.inner.state).closed
    }

    /// Images acquired and not yet dropped
    pub fn outstanding(&self) -> usize {
        lock(&self.inner.state).outstanding
    }

    pub fn width(&self) -> u32 {
        self.inner.width
    }

    pub fn height(&self) -> u32 {
        self.inner.height
    }

    pub fn format(&self) -> PixelFormat {
        self.inner.format
    }
}

impl fmt::Debug for ImageSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageSurface")
            .field("width", &self.inner.width)
            .field("height", &self.inner.height)
            .field("format", &self.inner.format)
            .field("max_images", &self.inner.max_images)
            .finish()
    }
}

/// An image acquired from a surface; dropping it returns its slot.
pub struct Image {
    planes: Vec<Bytes>,
    timestamp: i64,
    surface: Arc<SurfaceInner>,
}

impl Image {
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn planes(&self) -> &[Bytes] {
        &self.planes
    }

    /// Borrow the image as a [`FrameView`] for the duration of `f`.
    pub fn with_view<R>(&self, f: impl FnOnce(&FrameView<'_>) -> R) -> R {
        let planes: Vec<&[u8]> = self.planes.iter().map(|p| p.as_ref()).collect();
        let view = FrameView {
            planes: &planes,
            width: self.surface.width,
            height: self.surface.height,
            format: self.surface.format,
            timestamp: self.timestamp,
        };
        f(&view)
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        let mut state = lock(&self.surface.state);
        state.outstanding = state.outstanding.saturating_sub(1);
    }
}
