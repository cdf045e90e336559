use crate::error::{Error, Result};
use std::time::Duration;

/// Session registry configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Random bytes per session id (rendered as twice as many hex chars).
    pub id_bytes: usize,
    pub max_sessions: Option<usize>,

    /// Sessions untouched for longer than this are evicted. `None` disables
    /// eviction.
    pub idle_timeout: Option<Duration>,
    pub sweep_interval: Duration,

    /// Deadline around a single device run.
    pub execute_timeout: Option<Duration>,
    pub max_buffer_size: u64,
    pub default_entry_point: String,

    /// Reject argument counts that don't match the program's reflected
    /// bindings instead of leaving it to the device.
    pub strict_arity: bool,
    pub reaper_thread_name: String,

    #[cfg(feature = "telemetry")]
    pub enable_telemetry: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            id_bytes: 32,
            max_sessions: None,
            idle_timeout: None,
            sweep_interval: Duration::from_secs(1),
            execute_timeout: None,
            max_buffer_size: 256 * 1024 * 1024,
            default_entry_point: "main".to_string(),
            strict_arity: false,
            reaper_thread_name: "kernel-session-reaper".to_string(),

            #[cfg(feature = "telemetry")]
            enable_telemetry: true,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        if !(16..=64).contains(&self.id_bytes) {
            return Err(Error::config("id_bytes must be in 16..=64"));
        }

        if self.max_sessions == Some(0) {
            return Err(Error::config("max_sessions must be > 0"));
        }

        if self.sweep_interval.is_zero() {
            return Err(Error::config("sweep_interval must be > 0"));
        }

        if let Some(timeout) = self.idle_timeout {
            if timeout.is_zero() {
                return Err(Error::config("idle_timeout must be > 0"));
            }
        }

        if let Some(timeout) = self.execute_timeout {
            if timeout.is_zero() {
                return Err(Error::config("execute_timeout must be > 0"));
            }
        }

        if self.max_buffer_size == 0 {
            return Err(Error::config("max_buffer_size must be > 0"));
        }

        if self.default_entry_point.is_empty() {
            return Err(Error::config("default_entry_point must not be empty"));
        }

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn id_bytes(mut self, n: usize) -> Self {
        self.config.id_bytes = n;
        self
    }

    pub fn max_sessions(mut self, n: usize) -> Self {
        self.config.max_sessions = Some(n);
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = Some(timeout);
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    pub fn execute_timeout(mut self, timeout: Duration) -> Self {
        self.config.execute_timeout = Some(timeout);
        self
    }

    pub fn max_buffer_size(mut self, bytes: u64) -> Self {
        self.config.max_buffer_size = bytes;
        self
    }

    pub fn default_entry_point<S: Into<String>>(mut self, name: S) -> Self {
        self.config.default_entry_point = name.into();
        self
    }

    pub fn strict_arity(mut self, strict: bool) -> Self {
        self.config.strict_arity = strict;
        self
    }

    pub fn reaper_thread_name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.reaper_thread_name = name.into();
        self
    }

    #[cfg(feature = "telemetry")]
    pub fn enable_telemetry(mut self, enable: bool) -> Self {
        self.config.enable_telemetry = enable;
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.id_bytes, 32);
        assert_eq!(config.default_entry_point, "main");
        assert!(config.idle_timeout.is_none());
    }

    #[test]
    fn test_builder() {
        let config = Config::builder()
            .id_bytes(16)
            .max_sessions(8)
            .idle_timeout(Duration::from_secs(30))
            .execute_timeout(Duration::from_millis(500))
            .strict_arity(true)
            .build()
            .unwrap();

        assert_eq!(config.id_bytes, 16);
        assert_eq!(config.max_sessions, Some(8));
        assert!(config.strict_arity);
    }

    #[test]
    fn test_invalid_values() {
        assert!(Config::builder().id_bytes(8).build().is_err());
        assert!(Config::builder().id_bytes(65).build().is_err());
        assert!(Config::builder().max_sessions(0).build().is_err());
        assert!(Config::builder().sweep_interval(Duration::ZERO).build().is_err());
        assert!(Config::builder().execute_timeout(Duration::ZERO).build().is_err());
        assert!(Config::builder().max_buffer_size(0).build().is_err());
        assert!(Config::builder().default_entry_point("").build().is_err());
    }
}
