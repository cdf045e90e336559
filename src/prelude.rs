pub use crate::config::{Config, ConfigBuilder};
pub use crate::device::{Device, HostDevice};
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::kernel::{KernelInfo, SessionState};
pub use crate::reaper::SessionReaper;
pub use crate::registry::{SessionRegistry, SessionSpec};
pub use crate::service::{ApiResponse, ComputeService, Method};
pub use crate::session_id::SessionId;
pub use crate::types::{DataType, Elements};

#[cfg(feature = "gpu")]
pub use crate::device::{DeviceConfig, WgpuDevice};

pub use crate::telemetry::{Metrics, MetricsSnapshot};
