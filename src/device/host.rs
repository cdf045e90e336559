//! CPU reference device.
//!
//! Kernels are Rust closures registered under their entry-point name. A
//! closure is invoked once per work item with the work-item index and the
//! positional argument buffers (inputs, then outputs). Submitted source text
//! must still declare the entry point (`fn <name>`), so the same request
//! payloads work against this device and the GPU one.

use super::Device;
use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Host kernel body: `(work_item, args)`.
pub type HostKernelFn = dyn Fn(u32, &mut [Vec<u8>]) + Send + Sync;

#[derive(Clone)]
struct Registered {
    kernel: Arc<HostKernelFn>,
    arity: Option<usize>,
}

#[derive(Default)]
pub struct HostDevice {
    kernels: RwLock<HashMap<String, Registered>>,
}

impl HostDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the implementation of `entry_point`.
    pub fn register<F>(&self, entry_point: impl Into<String>, kernel: F)
    where
        F: Fn(u32, &mut [Vec<u8>]) + Send + Sync + 'static,
    {
        self.insert(entry_point.into(), Arc::new(kernel), None);
    }

    /// Register `entry_point` with a declared argument count, which is
    /// reported through [`Device::arity`].
    pub fn register_with_arity<F>(&self, entry_point: impl Into<String>, arity: usize, kernel: F)
    where
        F: Fn(u32, &mut [Vec<u8>]) + Send + Sync + 'static,
    {
        self.insert(entry_point.into(), Arc::new(kernel), Some(arity));
    }

    fn insert(&self, entry_point: String, kernel: Arc<HostKernelFn>, arity: Option<usize>) {
        self.kernels
            .write()
            .insert(entry_point, Registered { kernel, arity });
    }

    pub fn with_kernel<F>(self, entry_point: impl Into<String>, kernel: F) -> Self
    where
        F: Fn(u32, &mut [Vec<u8>]) + Send + Sync + 'static,
    {
        self.register(entry_point, kernel);
        self
    }

    pub fn with_kernel_arity<F>(self, entry_point: impl Into<String>, arity: usize, kernel: F) -> Self
    where
        F: Fn(u32, &mut [Vec<u8>]) + Send + Sync + 'static,
    {
        self.register_with_arity(entry_point, arity, kernel);
        self
    }

    pub fn kernel_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.kernels.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for HostDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostDevice")
            .field("kernels", &self.kernel_names())
            .finish()
    }
}

pub struct HostProgram {
    entry_point: String,
    kernel: Arc<HostKernelFn>,
    arity: Option<usize>,
}

impl HostProgram {
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }
}

impl fmt::Debug for HostProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostProgram")
            .field("entry_point", &self.entry_point)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

impl Device for HostDevice {
    type Program = HostProgram;
    type Buffer = Vec<u8>;

    fn name(&self) -> String {
        "host".to_string()
    }

    fn compile(&self, source: &str, entry_point: &str) -> Result<HostProgram> {
        if !declares_entry_point(source, entry_point) {
            return Err(Error::compile(format!(
                "entry point `{}` is not declared in the kernel source",
                entry_point
            )));
        }

        let registered = self.kernels.read().get(entry_point).cloned().ok_or_else(|| {
            Error::compile(format!(
                "no host implementation registered for entry point `{}`",
                entry_point
            ))
        })?;

        Ok(HostProgram {
            entry_point: entry_point.to_string(),
            kernel: registered.kernel,
            arity: registered.arity,
        })
    }

    fn arity(&self, program: &HostProgram) -> Option<usize> {
        program.arity
    }

    fn upload(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn allocate(&self, size: u64) -> Result<Vec<u8>> {
        let size = usize::try_from(size)
            .map_err(|_| Error::execution(format!("buffer of {} bytes exceeds host memory", size)))?;
        Ok(vec![0; size])
    }

    fn run(
        &self,
        program: &HostProgram,
        args: &mut [Vec<u8>],
        work_size: u32,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let kernel: &HostKernelFn = &*program.kernel;

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            for work_item in 0..work_size {
                if let Some(deadline) = deadline {
                    if Instant::now() >= deadline {
                        return Err(Error::execution(format!(
                            "kernel `{}` exceeded its deadline after {} of {} work items",
                            program.entry_point, work_item, work_size
                        )));
                    }
                }
                kernel(work_item, args);
            }
            Ok(())
        }));

        match outcome {
            Ok(result) => result,
            Err(payload) => Err(Error::execution(format!(
                "kernel `{}` panicked: {}",
                program.entry_point,
                panic_message(payload.as_ref())
            ))),
        }
    }

    fn read(&self, buffer: &Vec<u8>) -> Result<Vec<u8>> {
        Ok(buffer.clone())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn declares_entry_point(source: &str, entry_point: &str) -> bool {
    if entry_point.is_empty() {
        return false;
    }

    source.match_indices("fn ").any(|(pos, _)| {
        let at_word_start = source[..pos]
            .chars()
            .next_back()
            .map_or(true, |c| !is_ident_char(c));
        at_word_start
            && source[pos + 3..]
                .trim_start()
                .strip_prefix(entry_point)
                .map_or(false, |rest| !rest.starts_with(is_ident_char))
    })
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Read element `index` of a `u32` argument.
///
/// Panics when out of range, which fails the run with an execution error.
pub fn load_u32(buf: &[u8], index: usize) -> u32 {
    let o = index * 4;
    u32::from_le_bytes([buf[o], buf[o + 1], buf[o + 2], buf[o + 3]])
}

pub fn store_u32(buf: &mut [u8], index: usize, value: u32) {
    let o = index * 4;
    buf[o..o + 4].copy_from_slice(&value.to_le_bytes());
}

pub fn load_f32(buf: &[u8], index: usize) -> f32 {
    f32::from_bits(load_u32(buf, index))
}

pub fn store_f32(buf: &mut [u8], index: usize, value: f32) {
    store_u32(buf, index, value.to_bits());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_device() -> HostDevice {
        HostDevice::new().with_kernel("add", |i, args| {
            let i = i as usize;
            let sum = load_u32(&args[0], i) + load_u32(&args[1], i);
            store_u32(&mut args[2], i, sum);
        })
    }

    #[test]
    fn test_entry_point_detection() {
        assert!(declares_entry_point("fn add(a: u32) {}", "add"));
        assert!(declares_entry_point("@compute\nfn   add() {}", "add"));
        assert!(!declares_entry_point("fn adder() {}", "add"));
        assert!(!declares_entry_point("fn_add() {}", "add"));
        assert!(!declares_entry_point("cfn add() {}", "add"));
        assert!(!declares_entry_point("", "add"));
    }

    #[test]
    fn test_compile_requires_declaration_and_registration() {
        let device = add_device();
        assert!(device.compile("fn add() {}", "add").is_ok());

        let err = device.compile("not a kernel", "add").unwrap_err();
        assert!(matches!(err, Error::Compile(_)));

        let err = device.compile("fn mul() {}", "mul").unwrap_err();
        assert!(matches!(err, Error::Compile(_)));
    }

    #[test]
    fn test_run_adds() {
        let device = add_device();
        let program = device.compile("fn add() {}", "add").unwrap();

        let mut args = vec![
            device.upload(&[1, 0, 0, 0, 2, 0, 0, 0]).unwrap(),
            device.upload(&[5, 0, 0, 0, 6, 0, 0, 0]).unwrap(),
            device.allocate(8).unwrap(),
        ];
        device.run(&program, &mut args, 2, None).unwrap();

        let out = device.read(&args[2]).unwrap();
        assert_eq!(load_u32(&out, 0), 6);
        assert_eq!(load_u32(&out, 1), 8);
    }

    #[test]
    fn test_missing_argument_is_execution_error() {
        let device = add_device();
        let program = device.compile("fn add() {}", "add").unwrap();

        let mut args = vec![device.upload(&[1, 0, 0, 0]).unwrap()];
        let err = device.run(&program, &mut args, 1, None).unwrap_err();
        assert!(matches!(err, Error::Execution(_)));
    }

    #[test]
    fn test_declared_arity() {
        let device = add_device().with_kernel_arity("copy", 2, |i, args| {
            let v = load_u32(&args[0], i as usize);
            store_u32(&mut args[1], i as usize, v);
        });

        let add = device.compile("fn add() {}", "add").unwrap();
        assert_eq!(device.arity(&add), None);

        let copy = device.compile("fn copy() {}", "copy").unwrap();
        assert_eq!(device.arity(&copy), Some(2));
    }

    #[test]
    fn test_panic_is_execution_error() {
        let device = HostDevice::new().with_kernel("boom", |_, _| panic!("out of bounds"));
        let program = device.compile("fn boom() {}", "boom").unwrap();

        let err = device.run(&program, &mut [], 1, None).unwrap_err();
        assert!(matches!(err, Error::Execution(_)));
        assert!(err.to_string().contains("out of bounds"));
    }

    #[test]
    fn test_deadline() {
        let device = HostDevice::new().with_kernel("slow", |_, _| {
            std::thread::sleep(Duration::from_millis(20));
        });
        let program = device.compile("fn slow() {}", "slow").unwrap();

        let err = device
            .run(&program, &mut [], 100, Some(Duration::from_millis(30)))
            .unwrap_err();
        assert!(err.to_string().contains("deadline"));
    }
}
