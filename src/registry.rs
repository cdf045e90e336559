//! Session registry.
//!
//! Two locks are involved. The registry-wide `RwLock` guards only the
//! id -> entry map and is held just long enough to look up, insert or
//! remove. Each entry has its own `Mutex` around the kernel instance, held
//! for the whole of a bind, execute or read, so operations on one session are
//! totally ordered while different sessions proceed in parallel.
//!
//! Lock order is registry map, then entry `last_access`. The kernel mutex is
//! never taken while the map lock is held.

use crate::config::Config;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::kernel::{KernelInfo, KernelInstance, KernelOptions};
use crate::session_id::SessionId;
use crate::telemetry::{Metrics, MetricsSnapshot};
use crate::types::{DataType, Elements};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Everything needed to create a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSpec {
    pub source: String,
    pub data_type: DataType,
    pub output_sizes: Vec<u64>,
    /// Falls back to [`Config::default_entry_point`].
    pub entry_point: Option<String>,
}

impl SessionSpec {
    pub fn new(source: impl Into<String>, data_type: DataType) -> Self {
        Self {
            source: source.into(),
            data_type,
            output_sizes: Vec::new(),
            entry_point: None,
        }
    }

    pub fn outputs(mut self, sizes: impl Into<Vec<u64>>) -> Self {
        self.output_sizes = sizes.into();
        self
    }

    pub fn entry_point(mut self, name: impl Into<String>) -> Self {
        self.entry_point = Some(name.into());
        self
    }
}

/// A live session: one kernel instance and its lock.
pub struct SessionEntry<D: Device> {
    id: SessionId,
    data_type: DataType,
    created_at: Instant,
    last_access: Mutex<Instant>,
    kernel: Mutex<KernelInstance<D>>,
}

impl<D: Device> SessionEntry<D> {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn idle_for(&self) -> Duration {
        self.last_access.lock().elapsed()
    }

    fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    /// Lock the kernel instance. Blocks while another operation on this
    /// session is in progress.
    pub fn lock(&self) -> MutexGuard<'_, KernelInstance<D>> {
        self.kernel.lock()
    }
}

impl<D: Device> fmt::Debug for SessionEntry<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionEntry")
            .field("id", &self.id)
            .field("data_type", &self.data_type)
            .field("idle_for", &self.idle_for())
            .finish_non_exhaustive()
    }
}

/// Owns every live session on one device.
pub struct SessionRegistry<D: Device> {
    device: Arc<D>,
    config: Config,
    sessions: RwLock<HashMap<SessionId, Arc<SessionEntry<D>>>>,
    metrics: Arc<Metrics>,
}

impl<D: Device> SessionRegistry<D> {
    pub fn new(device: Arc<D>, config: Config) -> Result<Self> {
        config.validate()?;

        tracing::debug!(device = %device.name(), ?config, "session registry created");

        Ok(Self {
            device,
            config,
            sessions: RwLock::new(HashMap::new()),
            metrics: Arc::new(Metrics::new()),
        })
    }

    pub fn with_defaults(device: Arc<D>) -> Self {
        Self {
            device,
            config: Config::default(),
            sessions: RwLock::new(HashMap::new()),
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    fn record(&self, f: impl FnOnce(&Metrics)) {
        #[cfg(feature = "telemetry")]
        if !self.config.enable_telemetry {
            return;
        }
        f(&self.metrics)
    }

    /// Compile `spec` into a new session.
    ///
    /// Nothing is registered when validation or compilation fails.
    /// Compilation runs without the registry lock held.
    #[tracing::instrument(level = "debug", skip_all, fields(data_type = %spec.data_type))]
    pub fn create(&self, spec: SessionSpec) -> Result<SessionId> {
        if spec.source.trim().is_empty() {
            return Err(Error::validation("kernel source must not be empty"));
        }
        if let Some(&size) = spec
            .output_sizes
            .iter()
            .find(|&&s| s > self.config.max_buffer_size)
        {
            return Err(Error::validation(format!(
                "output of {} bytes exceeds the {} byte buffer limit",
                size, self.config.max_buffer_size
            )));
        }
        let entry_point = spec
            .entry_point
            .unwrap_or_else(|| self.config.default_entry_point.clone());
        if entry_point.is_empty() {
            return Err(Error::validation("entry point must not be empty"));
        }
        self.check_capacity(self.sessions.read().len())?;

        let mut kernel = KernelInstance::new(
            Arc::clone(&self.device),
            spec.data_type,
            KernelOptions::from(&self.config),
        );

        if let Err(e) = kernel.compile(&spec.source, &entry_point) {
            self.record(Metrics::record_compile_failure);
            tracing::warn!(entry_point = %entry_point, error = %e, "kernel failed to compile");
            return Err(e);
        }
        kernel.init_output_specs(spec.output_sizes)?;

        let id = {
            let mut sessions = self.sessions.write();
            self.check_capacity(sessions.len())?;

            let id = loop {
                let candidate = SessionId::generate(self.config.id_bytes);
                if !sessions.contains_key(&candidate) {
                    break candidate;
                }
            };

            let now = Instant::now();
            sessions.insert(
                id.clone(),
                Arc::new(SessionEntry {
                    id: id.clone(),
                    data_type: spec.data_type,
                    created_at: now,
                    last_access: Mutex::new(now),
                    kernel: Mutex::new(kernel),
                }),
            );
            id
        };

        self.record(Metrics::record_session_created);
        tracing::info!(session = %id.short(), entry_point = %entry_point, "session created");

        Ok(id)
    }

    fn check_capacity(&self, live: usize) -> Result<()> {
        match self.config.max_sessions {
            Some(max) if live >= max => Err(Error::CapacityExceeded(live)),
            _ => Ok(()),
        }
    }

    /// Look up a session without locking its kernel.
    pub fn get(&self, id: &SessionId) -> Result<Arc<SessionEntry<D>>> {
        let entry = self
            .sessions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("no session with id {}", id)))?;
        entry.touch();
        Ok(entry)
    }

    /// Run `f` with exclusive access to the session's kernel instance.
    pub fn with_locked_entry<R>(
        &self,
        id: &SessionId,
        f: impl FnOnce(&mut KernelInstance<D>) -> Result<R>,
    ) -> Result<R> {
        let entry = self.get(id)?;
        let result = {
            let mut kernel = entry.lock();
            f(&mut kernel)
        };
        entry.touch();
        result
    }

    /// Append an input. Returns its argument index.
    #[tracing::instrument(level = "debug", skip_all, fields(session = %id.short()))]
    pub fn bind_input(&self, id: &SessionId, elements: Elements) -> Result<usize> {
        let index = self.with_locked_entry(id, |kernel| kernel.bind_input(elements))?;
        self.record(Metrics::record_input_bound);
        Ok(index)
    }

    /// Bind or replace the input at `index`.
    #[tracing::instrument(level = "debug", skip_all, fields(session = %id.short(), index = index))]
    pub fn bind_input_at(&self, id: &SessionId, index: usize, elements: Elements) -> Result<usize> {
        let index = self.with_locked_entry(id, |kernel| kernel.bind_input_at(index, elements))?;
        self.record(Metrics::record_input_bound);
        Ok(index)
    }

    pub fn set_output_specs(&self, id: &SessionId, sizes: Vec<u64>) -> Result<()> {
        self.with_locked_entry(id, |kernel| kernel.set_output_specs(sizes))
    }

    #[tracing::instrument(level = "debug", skip_all, fields(session = %id.short()))]
    pub fn execute(&self, id: &SessionId) -> Result<()> {
        self.with_locked_entry(id, |kernel| {
            let uploaded = kernel.input_bytes();
            let started = Instant::now();
            let result = kernel.execute();
            let elapsed = started.elapsed();
            self.record(|m| m.record_execution(elapsed, uploaded, result.is_ok()));

            match &result {
                Ok(()) => tracing::debug!(
                    work_size = kernel.work_size(),
                    elapsed_us = elapsed.as_micros() as u64,
                    "kernel executed"
                ),
                Err(e) => tracing::warn!(error = %e, "kernel execution failed"),
            }
            result
        })
    }

    pub fn read_output(&self, id: &SessionId, index: usize) -> Result<Elements> {
        self.with_locked_entry(id, |kernel| kernel.read_output(index))
    }

    pub fn read_output_as(&self, id: &SessionId, index: usize, data_type: DataType) -> Result<Elements> {
        self.with_locked_entry(id, |kernel| kernel.read_output_as(index, data_type))
    }

    pub fn info(&self, id: &SessionId) -> Result<KernelInfo> {
        self.with_locked_entry(id, |kernel| Ok(kernel.info()))
    }

    /// Remove a session. Its device buffers are released once no caller
    /// still holds a handle to it.
    pub fn close(&self, id: &SessionId) -> Result<()> {
        let removed = self.sessions.write().remove(id);
        match removed {
            Some(_) => {
                self.record(Metrics::record_session_closed);
                tracing::info!(session = %id.short(), "session closed");
                Ok(())
            }
            None => Err(Error::not_found(format!("no session with id {}", id))),
        }
    }

    /// Evict sessions idle longer than the configured timeout that no
    /// caller is using. Returns how many were evicted.
    pub fn sweep_idle(&self) -> usize {
        let Some(timeout) = self.config.idle_timeout else {
            return 0;
        };

        let evicted: Vec<Arc<SessionEntry<D>>> = {
            let mut sessions = self.sessions.write();
            let idle: Vec<SessionId> = sessions
                .iter()
                .filter(|&(_, entry)| Arc::strong_count(entry) == 1 && entry.idle_for() > timeout)
                .map(|(id, _)| id.clone())
                .collect();
            idle.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        // Buffers are released here, outside the map lock
        for entry in &evicted {
            tracing::info!(session = %entry.id.short(), idle_for = ?entry.idle_for(), "session evicted");
        }
        if !evicted.is_empty() {
            self.record(|m| m.record_sessions_evicted(evicted.len()));
        }
        evicted.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.read().contains_key(id)
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.read().keys().cloned().collect()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl<D: Device> fmt::Debug for SessionRegistry<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("device", &self.device.name())
            .field("sessions", &self.len())
            .field("config", &self.config)
            .finish()
    }
}
