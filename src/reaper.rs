//! Background eviction of idle sessions.

use crate::device::Device;
use crate::error::Result;
use crate::registry::SessionRegistry;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

/// Thread calling [`SessionRegistry::sweep_idle`] every `sweep_interval`.
///
/// Holds only a weak reference, so it never keeps a registry alive. Dropping
/// the reaper stops the thread and waits for it.
#[derive(Debug)]
pub struct SessionReaper {
    shutdown: Option<Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl SessionReaper {
    /// Start a reaper for `registry`. Returns `None` when idle eviction is
    /// not configured.
    pub fn spawn<D: Device>(registry: &Arc<SessionRegistry<D>>) -> Result<Option<Self>> {
        if registry.config().idle_timeout.is_none() {
            return Ok(None);
        }

        let interval = registry.config().sweep_interval;
        let weak = Arc::downgrade(registry);
        let (shutdown, signal) = crossbeam_channel::bounded(0);

        let handle = thread::Builder::new()
            .name(registry.config().reaper_thread_name.clone())
            .spawn(move || reaper_loop(weak, signal, interval))?;

        tracing::debug!(?interval, "session reaper started");

        Ok(Some(Self {
            shutdown: Some(shutdown),
            handle: Some(handle),
        }))
    }

    /// Stop the thread and wait for it.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // Dropping the sender disconnects the channel and wakes the loop
        self.shutdown.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SessionReaper {
    fn drop(&mut self) {
        self.stop();
    }
}

fn reaper_loop<D: Device>(registry: Weak<SessionRegistry<D>>, signal: Receiver<()>, interval: Duration) {
    loop {
        match signal.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        let Some(registry) = registry.upgrade() else {
            break;
        };
        let evicted = registry.sweep_idle();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = registry.len(), "idle sweep finished");
        }
    }

    tracing::debug!("session reaper stopped");
}
