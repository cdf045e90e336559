//! kernel-session - remotely addressable compute kernels
//!
//! A client submits kernel source and output sizes, gets back an opaque
//! session id, streams input arrays into the session, triggers execution and
//! reads the results back. Sessions live in a [`SessionRegistry`] that
//! serializes access to each kernel instance while letting different
//! sessions run in parallel.
//!
//! # Quick Start
//!
//! ```
//! use kernel_session::prelude::*;
//! use kernel_session::device::host::{load_u32, store_u32};
//! use std::sync::Arc;
//!
//! let device = HostDevice::new().with_kernel("main", |i, args| {
//!     let i = i as usize;
//!     let sum = load_u32(&args[0], i) + load_u32(&args[1], i);
//!     store_u32(&mut args[2], i, sum);
//! });
//! let registry = SessionRegistry::new(Arc::new(device), Config::default())?;
//!
//! let id = registry.create(SessionSpec::new("fn main() {}", DataType::Uint32).outputs(vec![16]))?;
//! registry.bind_input(&id, vec![1u32, 2, 3, 4].into())?;
//! registry.bind_input(&id, vec![5u32, 6, 7, 8].into())?;
//! registry.execute(&id)?;
//!
//! assert_eq!(registry.read_output(&id, 0)?, Elements::Uint32(vec![6, 8, 10, 12]));
//! # Ok::<(), kernel_session::Error>(())
//! ```
//!
//! # Features
//!
//! - **gpu** (default): [`device::WgpuDevice`], WGSL kernels on any wgpu adapter
//! - **telemetry** (default): session and execute-latency metrics
//! - **cli** (default): the `kernel-session` binary

// Lint configuration
#![warn(missing_debug_implementations)]

pub mod config;
pub mod device;
pub mod error;
pub mod kernel;
pub mod prelude;
pub mod reaper;
pub mod registry;
pub mod service;
pub mod session_id;
pub mod telemetry;
pub mod types;

// Re-export key types at crate root
pub use config::{Config, ConfigBuilder};
pub use device::{Device, HostDevice};
pub use error::{Error, ErrorKind, Result};
pub use kernel::{KernelInfo, KernelInstance, SessionState};
pub use reaper::SessionReaper;
pub use registry::{SessionRegistry, SessionSpec};
pub use service::{ApiResponse, ComputeService, Method};
pub use session_id::SessionId;
pub use types::{DataType, Elements};

#[cfg(feature = "gpu")]
pub use device::WgpuDevice;
