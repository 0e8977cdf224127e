use std::{
    path::PathBuf,
    sync::mpsc::{self, RecvTimeoutError, Sender},
    time::{Duration, Instant},
};

use tracing::info;

const FIRST_REPORT: Duration = Duration::from_millis(500);
const REPORT_EVERY: Duration = Duration::from_secs(5);

/// Logs while a thread is blocked on a store lock file.
///
/// Quiet for the first half second, then reports once, then every five
/// seconds with the time waited so far. Reporting stops when the guard is
/// dropped.
pub(crate) struct LockWait {
    _stop: Sender<()>,
}

impl LockWait {
    pub(crate) fn start(lock_path: PathBuf) -> LockWait {
        let (stop, stopped) = mpsc::channel::<()>();
        std::thread::spawn(move || {
            let start = Instant::now();
            let mut waited = Duration::ZERO;
            loop {
                let next = next_report(waited);
                let timeout = (start + next).saturating_duration_since(Instant::now());
                match stopped.recv_timeout(timeout) {
                    Err(RecvTimeoutError::Timeout) => {}
                    // The guard is gone, so the lock was taken or given up on.
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
                waited = next;
                info!(
                    lock = %lock_path.display(),
                    waited_secs = waited.as_secs(),
                    "Waiting for store write lock"
                );
            }
        });
        LockWait { _stop: stop }
    }
}

/// When to report next, measured from the start of the wait.
fn next_report(waited: Duration) -> Duration {
    if waited < FIRST_REPORT {
        FIRST_REPORT
    } else if waited < REPORT_EVERY {
        REPORT_EVERY
    } else {
        waited + REPORT_EVERY
    }
}
