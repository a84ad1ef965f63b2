use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A background thread owned by whoever spawned it. Cancelling is synchronous: once `cancel`
/// returns, the body will never run again.
pub struct BackgroundTask {
    name: String,
    stopping: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    /// Runs `tick` every `period` until it returns false or the task is cancelled.
    pub fn periodic<F>(name: &str, period: Duration, mut tick: F) -> std::io::Result<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let stopping = Arc::new(AtomicBool::new(false));
        let thread_stopping = stopping.clone();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || loop {
                if !wait(period, &thread_stopping) {
                    break;
                }
                if !tick() {
                    break;
                }
            })?;

        Ok(Self {
            name: name.to_string(),
            stopping,
            handle: Some(handle),
        })
    }

    /// Runs `body` once after `delay`, unless cancelled first.
    pub fn delayed<F>(name: &str, delay: Duration, body: F) -> std::io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let stopping = Arc::new(AtomicBool::new(false));
        let thread_stopping = stopping.clone();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                if wait(delay, &thread_stopping) {
                    body();
                }
            })?;

        Ok(Self {
            name: name.to_string(),
            stopping,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn cancel(&mut self) {
        self.stopping.store(true, Ordering::Relaxed);

        if let Some(handle) = self.handle.take() {
            // A task cancelling itself from its own body can't join, the flag is enough there.
            if handle.thread().id() == thread::current().id() {
                return;
            }
            handle.thread().unpark();
            if handle.join().is_err() {
                warn!("Background task {} panicked", self.name);
            }
            debug!("Background task {} stopped", self.name);
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

// Sleeps for the duration, returns false if we were asked to stop in the meantime. Parking can
// wake early, so we loop until the deadline.
fn wait(duration: Duration, stopping: &AtomicBool) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if stopping.load(Ordering::Relaxed) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::park_timeout(deadline - now);
    }
}
