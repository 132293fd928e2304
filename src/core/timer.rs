//! Liveness monitor and reopen scheduler
//!
//! Both run on their own thread owned by the handle returned from `start`.
//! Dropping the handle cancels the timer without joining it, so a timer can be
//! stopped from anywhere, including from its own callback. A tick that was
//! already running when the timer was cancelled still completes; callbacks
//! are expected to re-check session state and ignore stale ticks.

use super::error::SerialError;
use crossbeam_channel::{after, bounded, select, Receiver, Sender};
use std::io;
use std::thread;
use std::time::Duration;
use tracing::trace;

/// Default interval between liveness probes
pub const DEFAULT_LIVENESS_INTERVAL: Duration = Duration::from_millis(500);

/// Result of one liveness probe
#[derive(Debug)]
pub enum Probe {
    /// Handle responded
    Alive,
    /// Handle is gone
    Lost(SerialError),
    /// The monitor no longer belongs to the current open cycle
    Retired,
}

/// Result of one reopen attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReopenOutcome {
    /// Line is open again
    Reopened,
    /// Attempt failed, try again after the interval
    Retry,
    /// Session left the waiting state, stop retrying
    Abandon,
}

/// Owns the cancel side of a timer thread
struct TimerWorker {
    cancel: Option<Sender<()>>,
}

impl TimerWorker {
    fn spawn<F>(name: String, body: F) -> io::Result<Self>
    where
        F: FnOnce(Receiver<()>) + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = bounded::<()>(1);
        thread::Builder::new().name(name).spawn(move || body(cancel_rx))?;
        Ok(Self {
            cancel: Some(cancel_tx),
        })
    }

    fn cancel(&mut self) {
        // Disconnecting the channel wakes the thread's select.
        self.cancel.take();
    }
}

impl Drop for TimerWorker {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Sleep for `interval` unless cancelled first. Returns `false` on cancel.
fn wait(cancel: &Receiver<()>, interval: Duration) -> bool {
    select! {
        recv(cancel) -> _ => false,
        recv(after(interval)) -> _ => true,
    }
}

/// Periodically probes an open handle; reports loss once, then stops.
pub struct LivenessMonitor {
    worker: TimerWorker,
}

impl LivenessMonitor {
    /// Start probing every `interval`. `on_lost` runs at most once, on the
    /// monitor's thread, after which the monitor stops itself.
    pub fn start<P, L>(name: String, interval: Duration, mut probe: P, on_lost: L) -> io::Result<Self>
    where
        P: FnMut() -> Probe + Send + 'static,
        L: FnOnce(SerialError) + Send + 'static,
    {
        let worker = TimerWorker::spawn(name, move |cancel| {
            while wait(&cancel, interval) {
                match probe() {
                    Probe::Alive => {}
                    Probe::Lost(cause) => {
                        on_lost(cause);
                        return;
                    }
                    Probe::Retired => break,
                }
            }
            trace!("Liveness monitor stopped");
        })?;
        Ok(Self { worker })
    }

    /// Stop probing. A probe already in progress still completes.
    pub fn stop(&mut self) {
        self.worker.cancel();
    }
}

/// Retries reopening at a fixed interval until told to stop.
pub struct ReopenScheduler {
    worker: TimerWorker,
}

impl ReopenScheduler {
    /// Fire `attempt` after each `interval`; re-arm while it returns `Retry`.
    pub fn start<A>(name: String, interval: Duration, mut attempt: A) -> io::Result<Self>
    where
        A: FnMut() -> ReopenOutcome + Send + 'static,
    {
        let worker = TimerWorker::spawn(name, move |cancel| {
            while wait(&cancel, interval) {
                if attempt() != ReopenOutcome::Retry {
                    break;
                }
            }
            trace!("Reopen scheduler stopped");
        })?;
        Ok(Self { worker })
    }

    /// Stop retrying
    pub fn stop(&mut self) {
        self.worker.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const TICK: Duration = Duration::from_millis(10);

    #[test]
    fn test_liveness_reports_loss_once() {
        let probes = Arc::new(AtomicUsize::new(0));
        let (lost_tx, lost_rx) = unbounded();

        let counter = probes.clone();
        let _monitor = LivenessMonitor::start(
            "test-liveness".into(),
            TICK,
            move || {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Probe::Alive
                } else {
                    Probe::Lost(SerialError::NotOpen)
                }
            },
            move |cause| lost_tx.send(cause.to_string()).unwrap(),
        )
        .unwrap();

        assert!(lost_rx.recv_timeout(Duration::from_secs(1)).is_ok());
        thread::sleep(TICK * 5);
        assert_eq!(probes.load(Ordering::SeqCst), 3);
        assert!(lost_rx.try_recv().is_err());
    }

    #[test]
    fn test_liveness_stop_cancels() {
        let probes = Arc::new(AtomicUsize::new(0));
        let counter = probes.clone();
        let mut monitor = LivenessMonitor::start(
            "test-liveness".into(),
            Duration::from_millis(50),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Probe::Alive
            },
            |_| panic!("not lost"),
        )
        .unwrap();
        monitor.stop();
        thread::sleep(Duration::from_millis(120));
        assert_eq!(probes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_reopen_rearms_until_success() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = unbounded();
        let counter = attempts.clone();
        let _scheduler = ReopenScheduler::start("test-reopen".into(), TICK, move || {
            if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                ReopenOutcome::Retry
            } else {
                done_tx.send(()).unwrap();
                ReopenOutcome::Reopened
            }
        })
        .unwrap();

        assert!(done_rx.recv_timeout(Duration::from_secs(1)).is_ok());
        thread::sleep(TICK * 5);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_reopen_drop_cancels() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let scheduler = ReopenScheduler::start("test-reopen".into(), Duration::from_millis(50), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            ReopenOutcome::Retry
        })
        .unwrap();
        drop(scheduler);
        thread::sleep(Duration::from_millis(120));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }
}
