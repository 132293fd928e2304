//! Deferred handle teardown
//!
//! Closing a serial handle can block until its notification thread exits, so
//! it must never happen on that thread. Handles are sent to a dedicated
//! worker instead; the sender does not wait for the close to finish.

use super::transport::SerialDevice;
use crossbeam_channel::{unbounded, Sender};
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread;
use tracing::{debug, error, warn};

struct TeardownJob {
    port: String,
    device: Box<dyn SerialDevice>,
}

/// Single-consumer worker that closes and drops retired handles
pub struct TeardownWorker {
    tx: Sender<TeardownJob>,
}

impl TeardownWorker {
    /// Spawn the worker thread
    pub fn spawn(name: String) -> io::Result<Self> {
        let (tx, rx) = unbounded::<TeardownJob>();
        thread::Builder::new().name(name).spawn(move || {
            for job in rx {
                dispose(job);
            }
            debug!("Teardown worker stopped");
        })?;
        Ok(Self { tx })
    }

    /// Hand a handle over for closing. Ownership moves to the worker for good.
    pub fn submit(&self, port: &str, device: Box<dyn SerialDevice>) {
        let job = TeardownJob {
            port: port.to_string(),
            device,
        };
        if let Err(err) = self.tx.send(job) {
            // Worker is gone; close on a one-off thread rather than the caller's.
            let job = err.into_inner();
            if let Err(e) = thread::Builder::new()
                .name("serline-teardown-fallback".into())
                .spawn(move || dispose(job))
            {
                error!(error = %e, "Could not spawn fallback teardown thread, leaking handle");
            }
        }
    }
}

fn dispose(job: TeardownJob) {
    let TeardownJob { port, mut device } = job;
    match catch_unwind(AssertUnwindSafe(|| device.close())) {
        Ok(Ok(())) => debug!(port = %port, "Handle closed"),
        Ok(Err(e)) => warn!(port = %port, error = %e, "Closing handle failed, ignoring"),
        Err(_) => warn!(port = %port, "Closing handle panicked, ignoring"),
    }
    drop(device);
}
