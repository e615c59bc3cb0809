use std::sync::Mutex;

use crate::capture::frame::{Frame, FrameSnapshot};
use crate::detect::DetectionResult;
use crate::utils::lock;

/// The pair shown to the user: one frame and the results computed from it.
///
/// Both halves change together under one lock, so a reader never sees a
/// frame next to results from a different frame.
#[derive(Debug, Default)]
pub struct Output {
    state: Mutex<Published>,
}

#[derive(Debug, Default)]
struct Published {
    frame: Frame,
    visible: bool,
    results: Option<Vec<DetectionResult>>,
    epoch: u64,
    cycle: u64,
}

/// Copy of the published pair
#[derive(Debug, Clone, Default)]
pub struct OutputSnapshot {
    /// `None` when nothing is displayed
    pub frame: Option<FrameSnapshot>,
    /// `None` when detection did not run for this frame
    pub results: Option<Vec<DetectionResult>>,
    /// Number of publishes so far
    pub cycle: u64,
}

impl OutputSnapshot {
    pub fn results(&self) -> &[DetectionResult] {
        self.results.as_deref().unwrap_or_default()
    }
}

impl Output {
    /// Publish `working` with its results by swapping buffers with the
    /// displayed frame. `working` receives the previous displayed buffer for
    /// reuse. Publishes from an older epoch are rejected.
    pub fn publish(
        &self,
        working: &mut Frame,
        results: Option<Vec<DetectionResult>>,
        epoch: u64,
    ) -> bool {
        let mut state = lock(&self.state);
        if epoch != state.epoch {
            return false;
        }
        std::mem::swap(&mut state.frame, working);
        state.visible = true;
        state.results = results;
        state.cycle += 1;
        true
    }

    /// Clear the displayed pair and only accept publishes from `epoch` on.
    pub fn clear(&self, epoch: u64) {
        let mut state = lock(&self.state);
        state.visible = false;
        state.results = None;
        state.frame.clear();
        state.epoch = epoch;
    }

    pub fn snapshot(&self) -> OutputSnapshot {
        let state = lock(&self.state);
        OutputSnapshot {
            frame: state.visible.then(|| state.frame.snapshot()),
            results: state.results.clone(),
            cycle: state.cycle,
        }
    }

    pub fn is_visible(&self) -> bool {
        lock(&self.state).visible
    }
}
