//! Presentation context
//! The renderer lives on one thread and is only reached by posting tasks to it.
//! Redraw posts are coalesced: the thread re-reads the published output when
//! it gets to a redraw, so any number of pending redraws collapse into one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flume::{Receiver, Sender};
use tracing::{debug, info};

use crate::display::{NormalizedRect, Notice, Renderer};
use crate::error::{Error, Result};
use crate::pipeline::output::Output;
use crate::utils::join_with_deadline;

enum Task {
    Redraw,
    Notice(Notice),
    Shutdown,
}

/// Cheap handle for posting work to the presentation thread
#[derive(Clone)]
pub struct Poster {
    tx: Sender<Task>,
    pending: Arc<AtomicBool>,
}

impl Poster {
    /// Ask for the current output to be presented.
    pub fn redraw(&self) {
        if !self.pending.swap(true, Ordering::AcqRel) && self.tx.send(Task::Redraw).is_err() {
            self.pending.store(false, Ordering::Release);
        }
    }

    pub fn notice(&self, notice: Notice) {
        info!(%notice, "posting notice");
        let _ = self.tx.send(Task::Notice(notice));
    }
}

/// Owner of the presentation thread
pub struct Presenter {
    tx: Sender<Task>,
    handle: Option<JoinHandle<()>>,
}

impl Presenter {
    pub fn start(output: Arc<Output>, renderer: Box<dyn Renderer>) -> Result<(Self, Poster)> {
        let (tx, rx) = flume::unbounded();
        let pending = Arc::new(AtomicBool::new(false));
        let flag = pending.clone();
        let handle = thread::Builder::new()
            .name("presentation".into())
            .spawn(move || run(rx, &flag, &output, renderer))
            .map_err(|source| Error::Spawn {
                name: "presentation",
                source,
            })?;

        let poster = Poster {
            tx: tx.clone(),
            pending,
        };
        Ok((
            Self {
                tx,
                handle: Some(handle),
            },
            poster,
        ))
    }

    /// Drain queued tasks, then stop the thread within `deadline`.
    pub fn shutdown(&mut self, deadline: Duration) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };
        let _ = self.tx.send(Task::Shutdown);
        join_with_deadline(handle, deadline)
    }
}

impl Drop for Presenter {
    fn drop(&mut self) {
        self.shutdown(Duration::from_secs(1));
    }
}

fn run(rx: Receiver<Task>, pending: &AtomicBool, output: &Output, mut renderer: Box<dyn Renderer>) {
    debug!("presentation thread started");
    let mut rects = Vec::new();
    for task in rx.iter() {
        match task {
            Task::Redraw => {
                pending.store(false, Ordering::Release);
                let snapshot = output.snapshot();
                rects.clear();
                if let Some(frame) = &snapshot.frame {
                    rects.extend(
                        snapshot
                            .results()
                            .iter()
                            .filter_map(|r| NormalizedRect::from_detection(r, frame.width, frame.height)),
                    );
                }
                renderer.present(snapshot.frame.as_ref(), &rects);
            }
            Task::Notice(notice) => renderer.notice(&notice),
            Task::Shutdown => break,
        }
    }
    debug!("presentation thread stopped");
}
