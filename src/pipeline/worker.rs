use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use arc_swap::ArcSwap;
use tracing::{debug, info, trace, warn};

use crate::capture::frame::Frame;
use crate::detect::{DetectionResult, Detector};
use crate::error::{DetectorError, Error, Result};
use crate::pipeline::Shared;
use crate::Config;

/// Runs the detector over frames taken from the slot, one at a time.
pub struct DetectionWorker {
    detector: Box<dyn Detector>,
}

impl DetectionWorker {
    pub fn new(detector: Box<dyn Detector>) -> Self {
        Self { detector }
    }

    /// One detection cycle over `frame`.
    ///
    /// `None` when detection is disarmed. A failing or panicking detector
    /// yields `Some` of an empty collection. Returned boxes lie inside the
    /// frame.
    pub fn run_cycle(&mut self, frame: &Frame, armed: bool) -> Option<Vec<DetectionResult>> {
        if !armed {
            return None;
        }

        let (width, height) = (frame.width(), frame.height());
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.detector
                .detect(frame.data(), frame.format().code(), width, height)
        }));
        metrics::histogram!("detection_time_us").record(started.elapsed().as_micros() as f64);

        let results = match outcome {
            Ok(Ok(results)) => results,
            Ok(Err(err)) => return Some(failed(err, frame)),
            Err(payload) => return Some(failed(DetectorError::Panicked(panic_message(&*payload)), frame)),
        };
        trace!(sequence = frame.sequence(), found = results.len(), "detection cycle");
        Some(
            results
                .into_iter()
                .filter_map(|r| r.clamp_to(width, height))
                .collect(),
        )
    }

    pub(crate) fn spawn(
        mut self,
        shared: Arc<Shared>,
        config: Arc<ArcSwap<Config>>,
    ) -> Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("detection-worker".into())
            .spawn(move || self.run(&shared, &config))
            .map_err(|source| Error::Spawn {
                name: "detection-worker",
                source,
            })
    }

    fn run(&mut self, shared: &Shared, config: &ArcSwap<Config>) {
        info!("detection worker started");
        let mut working = Frame::default();
        loop {
            let idle = config.load().pipeline.worker_idle();
            let Some(epoch) = shared.slot.take_into(&mut working, idle) else {
                if shared.slot.is_closed() {
                    break;
                }
                continue;
            };

            let armed = shared.flags.detection_armed();
            let results = self.run_cycle(&working, armed);
            let sequence = working.sequence();
            if shared.output.publish(&mut working, results, epoch) {
                shared.poster.redraw();
            } else {
                debug!(sequence, epoch, "discarded frame from a stopped source");
            }
        }
        info!("detection worker stopped");
    }
}

fn failed(err: DetectorError, frame: &Frame) -> Vec<DetectionResult> {
    metrics::counter!("detection_failures").increment(1);
    warn!(sequence = frame.sequence(), "{}", Error::from(err));
    Vec::new()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "detector panicked".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::{FrameView, PixelFormat};

    fn frame(width: u32, height: u32) -> Frame {
        let pixels = vec![0u8; (width * height * 4) as usize];
        let planes = [pixels.as_slice()];
        let mut frame = Frame::default();
        frame
            .fill(&FrameView {
                planes: &planes,
                width,
                height,
                format: PixelFormat::Rgba,
                timestamp: 0,
            })
            .unwrap();
        frame
    }

    #[test]
    fn disarmed_cycle_passes_frame_through() {
        let mut worker = DetectionWorker::new(Box::new(
            |_: &[u8], _: i32, _: u32, _: u32| -> std::result::Result<Vec<DetectionResult>, DetectorError> {
                panic!("detector must not run while disarmed")
            },
        ));
        assert_eq!(worker.run_cycle(&frame(4, 4), false), None);
    }

    #[test]
    fn results_are_clamped_to_the_frame() {
        let mut worker = DetectionWorker::new(Box::new(
            |_: &[u8], code: i32, w: u32, h: u32| -> std::result::Result<Vec<DetectionResult>, DetectorError> {
                assert_eq!(code, PixelFormat::Rgba.code());
                Ok(vec![
                    DetectionResult::new(-4.0, 1.0, w as f32 + 10.0, h as f32 * 2.0),
                    DetectionResult::new(f32::INFINITY, 0.0, 1.0, 1.0),
                ])
            },
        ));
        let results = worker.run_cycle(&frame(8, 6), true).unwrap();
        assert_eq!(results.len(), 1);
        let r = &results[0];
        assert_eq!((r.x1, r.y1, r.x2, r.y2), (0.0, 1.0, 8.0, 6.0));
    }

    #[test]
    fn errors_and_panics_become_empty_results() {
        let mut worker = DetectionWorker::new(Box::new(
            |_: &[u8], _: i32, _: u32, _: u32| -> std::result::Result<Vec<DetectionResult>, DetectorError> {
                Err(DetectorError::Backend("model not loaded".into()))
            },
        ));
        assert_eq!(worker.run_cycle(&frame(2, 2), true), Some(Vec::new()));

        let mut calls = 0;
        let mut worker = DetectionWorker::new(Box::new(
            move |_: &[u8], _: i32, _: u32, _: u32| -> std::result::Result<Vec<DetectionResult>, DetectorError> {
                calls += 1;
                if calls == 1 {
                    panic!("inference crashed");
                }
                Ok(vec![DetectionResult::new(0.0, 0.0, 1.0, 1.0)])
            },
        ));
        assert_eq!(worker.run_cycle(&frame(2, 2), true), Some(Vec::new()));
        assert_eq!(worker.run_cycle(&frame(2, 2), true).map(|r| r.len()), Some(1));
    }

    #[test]
    fn panic_payloads_are_described() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*payload), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*payload), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(&*payload), "detector panicked");
    }
}
