//! Dedicated platform thread that owns one hardware stream.
//!
//! cpal streams are not `Send`, so each one is built, played and dropped on its
//! own thread. The owner talks to that thread only through a stop signal and a
//! completion signal.

use crate::{Result, TutorError};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Handed to the thread body; the owner uses it to request a bounded drain.
pub struct StopSignal {
    rx: Receiver<Duration>,
}

impl StopSignal {
    /// Block until the owner asks the thread to stop. Returns the drain budget.
    pub fn wait(&self) -> Duration {
        self.rx.recv().unwrap_or(Duration::ZERO)
    }
}

pub struct DeviceThread {
    name: String,
    stop_tx: Sender<Duration>,
    done_rx: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl DeviceThread {
    /// Spawn `body` on a named thread and wait until it reports the stream is running.
    ///
    /// `body` must send exactly one readiness result before blocking on the stop signal.
    pub fn spawn<F>(name: &str, startup_timeout: Duration, body: F) -> Result<Self>
    where
        F: FnOnce(StopSignal, Sender<Result<()>>) + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<Duration>(1);
        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);
        let (done_tx, done_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                body(StopSignal { rx: stop_rx }, ready_tx);
                let _ = done_tx.send(());
            })
            .map_err(|e| TutorError::DeviceError(format!("Failed to spawn {}: {}", name, e)))?;

        match ready_rx.recv_timeout(startup_timeout) {
            Ok(Ok(())) => {
                info!(thread = name, "audio device thread running");
                Ok(Self {
                    name: name.to_string(),
                    stop_tx,
                    done_rx,
                    handle: Some(handle),
                })
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = stop_tx.try_send(Duration::ZERO);
                Err(TutorError::DeviceError(format!(
                    "{} did not start within {:?}",
                    name, startup_timeout
                )))
            }
        }
    }

    /// Signal the thread to stop and wait for it to finish its drain.
    ///
    /// Returns false if the thread did not finish within `drain` plus a grace period;
    /// it is then detached.
    pub fn stop(&mut self, drain: Duration) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };
        let _ = self.stop_tx.try_send(drain);

        match self.done_rx.recv_timeout(drain + Duration::from_millis(250)) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = handle.join();
                debug!(thread = %self.name, "audio device thread stopped");
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(thread = %self.name, "audio device thread did not stop in time, detaching");
                false
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl std::fmt::Debug for DeviceThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceThread")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Drop for DeviceThread {
    fn drop(&mut self) {
        self.stop(Duration::ZERO);
    }
}
