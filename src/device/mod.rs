//! Compute device capability.
//!
//! A [`Device`] compiles kernel source into a program, owns device-side
//! buffers, and runs a program synchronously over a number of work items.
//! Kernel arguments are positional: inputs first, then outputs, and argument
//! `i` is handed to the program at slot `i`.

pub mod host;

#[cfg(feature = "gpu")]
pub mod gpu;

pub use host::{HostDevice, HostKernelFn, HostProgram};

#[cfg(feature = "gpu")]
pub use gpu::{DeviceConfig, WgpuBuffer, WgpuDevice, WgpuProgram};

use crate::error::Result;
use std::time::Duration;

/// Synchronous compile/run capability used by kernel instances.
pub trait Device: Send + Sync + 'static {
    /// Compiled, executable form of a kernel.
    type Program: Send;

    /// Device-side memory owned by a kernel instance. Dropping it releases
    /// the memory.
    type Buffer: Send;

    /// Human readable device name.
    fn name(&self) -> String;

    /// Compile `source`, selecting `entry_point` as the kernel function.
    ///
    /// Failures are reported as [`crate::Error::Compile`].
    fn compile(&self, source: &str, entry_point: &str) -> Result<Self::Program>;

    /// Number of argument slots the program declares, if the device can
    /// tell.
    fn arity(&self, _program: &Self::Program) -> Option<usize> {
        None
    }

    /// Transfer host bytes into a fresh device buffer.
    fn upload(&self, data: &[u8]) -> Result<Self::Buffer>;

    /// Allocate a zeroed device buffer of `size` bytes.
    fn allocate(&self, size: u64) -> Result<Self::Buffer>;

    /// Run `program` over `work_size` work items with `args` bound at their
    /// positional slots. Blocks until the device finishes or `timeout`
    /// elapses.
    ///
    /// Failures are reported as [`crate::Error::Execution`].
    fn run(
        &self,
        program: &Self::Program,
        args: &mut [Self::Buffer],
        work_size: u32,
        timeout: Option<Duration>,
    ) -> Result<()>;

    /// Read a buffer back to host memory.
    fn read(&self, buffer: &Self::Buffer) -> Result<Vec<u8>>;
}
