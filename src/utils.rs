use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use tracing::{error, warn};

const JOIN_POLL: Duration = Duration::from_millis(5);

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Nanoseconds on the process-wide monotonic clock
pub fn monotonic_nanos() -> i64 {
    i64::try_from(EPOCH.elapsed().as_nanos()).unwrap_or(i64::MAX)
}

/// Cooperative stop request shared between a loop and its owner
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    wake_tx: flume::Sender<()>,
    wake_rx: flume::Receiver<()>,
}

impl Default for CancelToken {
    fn default() -> Self {
        let (wake_tx, wake_rx) = flume::bounded(1);
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            wake_tx,
            wake_rx,
        }
    }
}

impl CancelToken {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        let _ = self.wake_tx.try_send(());
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Sleep for `duration` unless cancelled first. Returns `true` if cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        let _ = self.wake_rx.recv_timeout(duration);
        self.is_cancelled()
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Join `handle`, giving up after `deadline`.
///
/// Returns `false` when the thread was left running (detached) instead of joined.
pub(crate) fn join_with_deadline(handle: JoinHandle<()>, deadline: Duration) -> bool {
    let name = handle.thread().name().unwrap_or("unnamed").to_owned();
    if handle.thread().id() == thread::current().id() {
        warn!(thread = %name, "refusing to join the current thread");
        return false;
    }

    let started = Instant::now();
    while !handle.is_finished() {
        if started.elapsed() >= deadline {
            error!(thread = %name, ?deadline, "thread did not stop in time, detaching it");
            return false;
        }
        thread::sleep(JOIN_POLL);
    }
    if handle.join().is_err() {
        warn!(thread = %name, "thread exited with a panic");
    }
    true
}
