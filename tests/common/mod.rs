#![allow(dead_code)]

use kernel_session::device::host::{load_f32, load_u32, store_f32, store_u32};
use kernel_session::{Config, DataType, HostDevice, SessionRegistry, SessionSpec};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const ADD: &str = "fn add(a, b, c) {}";
pub const ADD_F32: &str = "fn add_f32(a, b, c) {}";
pub const SLOW: &str = "fn slow(a, b) {}";
pub const SLEEP: &str = "fn sleep(a) {}";

/// Tracks how many `slow` runs are inside the kernel at once.
#[derive(Debug, Default)]
pub struct InFlight {
    current: AtomicUsize,
    max: AtomicUsize,
    pub log: Mutex<Vec<(usize, &'static str)>>,
}

impl InFlight {
    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Host device with the kernels used across the integration tests.
///
/// - `add`: `c[i] = a[i] + b[i]` on u32, bounds-checked
/// - `add_f32`: the same on f32
/// - `slow`: records entry/exit of work item 0 tagged with input[0], sleeps
/// - `sleep`: sleeps 10ms per work item
pub fn device(in_flight: Arc<InFlight>) -> HostDevice {
    HostDevice::new()
        .with_kernel_arity("add", 3, |i, args| {
            let i = i as usize;
            if i < args[0].len() / 4 && i < args[1].len() / 4 && i < args[2].len() / 4 {
                let sum = load_u32(&args[0], i).wrapping_add(load_u32(&args[1], i));
                store_u32(&mut args[2], i, sum);
            }
        })
        .with_kernel_arity("add_f32", 3, |i, args| {
            let i = i as usize;
            if i < args[2].len() / 4 {
                let sum = load_f32(&args[0], i) + load_f32(&args[1], i);
                store_f32(&mut args[2], i, sum);
            }
        })
        .with_kernel_arity("slow", 2, move |i, args| {
            if i == 0 {
                in_flight.enter();
                in_flight.log.lock().push((load_u32(&args[0], 0) as usize, "enter"));
                std::thread::sleep(Duration::from_millis(20));
                in_flight.log.lock().push((load_u32(&args[0], 0) as usize, "exit"));
                in_flight.exit();
            }
            let tag = load_u32(&args[0], 0);
            store_u32(&mut args[1], i as usize, tag);
        })
        .with_kernel_arity("sleep", 1, |_, _| {
            std::thread::sleep(Duration::from_millis(10));
        })
}

pub fn registry(config: Config) -> Arc<SessionRegistry<HostDevice>> {
    registry_with(config, Arc::new(InFlight::default()))
}

pub fn registry_with(config: Config, in_flight: Arc<InFlight>) -> Arc<SessionRegistry<HostDevice>> {
    Arc::new(SessionRegistry::new(Arc::new(device(in_flight)), config).unwrap())
}

pub fn add_spec() -> SessionSpec {
    SessionSpec::new(ADD, DataType::Uint32)
        .outputs(vec![16])
        .entry_point("add")
}

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}
