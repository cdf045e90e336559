//! WGSL kernels on a wgpu adapter.
//!
//! Argument slot `i` is `@group(0) @binding(i)` in the kernel source. The
//! work size is divided by the entry point's `@workgroup_size` x dimension to
//! get the dispatch count, so kernels must bounds-check their global id.

use super::Device;
use crate::error::{Error, Result};
use futures::executor::block_on;
use parking_lot::{Mutex, RwLock};
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use wgpu::util::DeviceExt;

/// Adapter selection for [`WgpuDevice`].
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub backends: wgpu::Backends,
    pub power_preference: wgpu::PowerPreference,
    pub force_fallback_adapter: bool,
    pub label: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            backends: wgpu::Backends::all(),
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            label: "kernel-session-device".to_string(),
        }
    }
}

/// wgpu-backed compute device.
#[derive(Debug)]
pub struct WgpuDevice {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    adapter_info: wgpu::AdapterInfo,
    // wgpu error scopes are a per-device stack, so push/pop pairs from
    // different sessions must not interleave.
    scope_lock: Mutex<()>,
}

impl WgpuDevice {
    /// Initialize on the default high-performance adapter.
    pub async fn new() -> Result<Self> {
        Self::with_config(DeviceConfig::default()).await
    }

    pub async fn with_config(config: DeviceConfig) -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: config.backends,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: config.power_preference,
                compatible_surface: None,
                force_fallback_adapter: config.force_fallback_adapter,
            })
            .await
            .ok_or_else(|| Error::gpu("No GPU adapter found"))?;

        let adapter_info = adapter.get_info();

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some(&config.label),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                },
                None,
            )
            .await
            .map_err(|e| Error::gpu(format!("Failed to request device: {}", e)))?;

        device.on_uncaptured_error(Box::new(|err: wgpu::Error| {
            tracing::error!(error = %err, "uncaptured wgpu error");
        }));

        tracing::info!(
            adapter = %adapter_info.name,
            backend = ?adapter_info.backend,
            "wgpu device ready"
        );

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_info,
            scope_lock: Mutex::new(()),
        })
    }

    /// Blocking variant of [`WgpuDevice::with_config`].
    pub fn new_blocking(config: DeviceConfig) -> Result<Self> {
        block_on(Self::with_config(config))
    }

    /// Get or initialize the process-wide device.
    pub fn get_or_init() -> Result<Arc<Self>> {
        static SHARED: RwLock<Option<Arc<WgpuDevice>>> = RwLock::new(None);

        {
            let shared = SHARED.read();
            if let Some(device) = shared.as_ref() {
                return Ok(Arc::clone(device));
            }
        }

        let mut shared = SHARED.write();
        if let Some(device) = shared.as_ref() {
            return Ok(Arc::clone(device));
        }

        let device = Arc::new(Self::new_blocking(DeviceConfig::default())?);
        *shared = Some(Arc::clone(&device));
        Ok(device)
    }

    /// Describe every adapter visible on `backends`.
    pub fn enumerate_adapters(backends: wgpu::Backends) -> Vec<wgpu::AdapterInfo> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });
        instance
            .enumerate_adapters(backends)
            .into_iter()
            .map(|adapter| adapter.get_info())
            .collect()
    }

    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter_info
    }

    /// Run `f` inside a validation error scope, mapping a captured error
    /// with `on_error`.
    fn scoped<T>(&self, on_error: fn(String) -> Error, f: impl FnOnce() -> T) -> Result<T> {
        let _guard = self.scope_lock.lock();
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        match block_on(self.device.pop_error_scope()) {
            Some(err) => Err(on_error(err.to_string())),
            None => Ok(value),
        }
    }

    fn checked_size(&self, size: u64) -> Result<u64> {
        let padded = padded_size(size);
        let limits = self.device.limits();
        let max = u64::from(limits.max_storage_buffer_binding_size).min(limits.max_buffer_size);
        if padded > max {
            return Err(Error::execution(format!(
                "buffer of {} bytes exceeds the device limit of {} bytes",
                size, max
            )));
        }
        Ok(padded)
    }

    fn wait_for(&self, index: wgpu::SubmissionIndex, deadline: Option<Instant>) -> Result<()> {
        let Some(deadline) = deadline else {
            let _ = self.device.poll(wgpu::Maintain::WaitForSubmissionIndex(index));
            return Ok(());
        };

        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        self.queue
            .on_submitted_work_done(move || flag.store(true, Ordering::Release));

        let mut pause = Duration::from_micros(10);
        loop {
            let _ = self.device.poll(wgpu::Maintain::Poll);
            if done.load(Ordering::Acquire) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::execution("kernel exceeded its deadline"));
            }
            std::thread::sleep(pause);
            pause = (pause * 2).min(Duration::from_millis(1));
        }
    }
}

/// Compiled compute pipeline plus the reflection needed to bind it.
#[derive(Debug)]
pub struct WgpuProgram {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: Option<wgpu::BindGroupLayout>,
    entry_point: String,
    workgroup_size: [u32; 3],
    bindings: Vec<u32>,
}

impl WgpuProgram {
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn workgroup_size(&self) -> [u32; 3] {
        self.workgroup_size
    }
}

/// Device buffer with its logical (unpadded) size. Destroyed on drop.
#[derive(Debug)]
pub struct WgpuBuffer {
    buffer: wgpu::Buffer,
    size: u64,
}

impl WgpuBuffer {
    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Drop for WgpuBuffer {
    fn drop(&mut self) {
        self.buffer.destroy();
    }
}

impl Device for WgpuDevice {
    type Program = WgpuProgram;
    type Buffer = WgpuBuffer;

    fn name(&self) -> String {
        format!("{} ({:?})", self.adapter_info.name, self.adapter_info.backend)
    }

    fn compile(&self, source: &str, entry_point: &str) -> Result<WgpuProgram> {
        let module = naga::front::wgsl::parse_str(source)
            .map_err(|e| Error::compile(e.emit_to_string(source)))?;

        naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        )
        .validate(&module)
        .map_err(|e| Error::compile(format!("invalid kernel: {}", e)))?;

        let ep = module
            .entry_points
            .iter()
            .find(|ep| ep.name == entry_point)
            .ok_or_else(|| {
                Error::compile(format!("entry point `{}` not found in kernel source", entry_point))
            })?;
        if ep.stage != naga::ShaderStage::Compute {
            return Err(Error::compile(format!(
                "entry point `{}` is not a compute entry point",
                entry_point
            )));
        }
        let workgroup_size = ep.workgroup_size;

        let mut bindings: Vec<u32> = module
            .global_variables
            .iter()
            .filter(|(_, var)| matches!(var.space, naga::AddressSpace::Storage { .. }))
            .filter_map(|(_, var)| var.binding.as_ref())
            .filter(|rb| rb.group == 0)
            .map(|rb| rb.binding)
            .collect();
        bindings.sort_unstable();
        bindings.dedup();

        let (pipeline, bind_group_layout) = self.scoped(Error::Compile, || {
            let shader = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(entry_point),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
            });

            let pipeline = self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry_point),
                layout: None,
                module: &shader,
                entry_point,
            });

            let layout = (!bindings.is_empty()).then(|| pipeline.get_bind_group_layout(0));
            (pipeline, layout)
        })?;

        tracing::debug!(
            entry_point,
            ?workgroup_size,
            bindings = bindings.len(),
            "compiled WGSL kernel"
        );

        Ok(WgpuProgram {
            pipeline,
            bind_group_layout,
            entry_point: entry_point.to_string(),
            workgroup_size,
            bindings,
        })
    }

    fn arity(&self, program: &WgpuProgram) -> Option<usize> {
        Some(program.bindings.len())
    }

    fn upload(&self, data: &[u8]) -> Result<WgpuBuffer> {
        let padded = self.checked_size(data.len() as u64)?;
        let contents: Cow<'_, [u8]> = if padded == data.len() as u64 {
            Cow::Borrowed(data)
        } else {
            let mut bytes = data.to_vec();
            bytes.resize(padded as usize, 0);
            Cow::Owned(bytes)
        };

        let buffer = self.scoped(Error::Execution, || {
            self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("kernel-input"),
                contents: &contents,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
            })
        })?;

        Ok(WgpuBuffer {
            buffer,
            size: data.len() as u64,
        })
    }

    fn allocate(&self, size: u64) -> Result<WgpuBuffer> {
        let padded = self.checked_size(size)?;

        let buffer = self.scoped(Error::Execution, || {
            self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("kernel-output"),
                size: padded,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            })
        })?;

        Ok(WgpuBuffer { buffer, size })
    }

    fn run(
        &self,
        program: &WgpuProgram,
        args: &mut [WgpuBuffer],
        work_size: u32,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let groups = work_size.div_ceil(program.workgroup_size[0].max(1));
        let max_groups = self.device.limits().max_compute_workgroups_per_dimension;
        if groups > max_groups {
            return Err(Error::execution(format!(
                "work size {} needs {} workgroups, device allows {}",
                work_size, groups, max_groups
            )));
        }
        if program.bind_group_layout.is_none() && !args.is_empty() {
            return Err(Error::execution(format!(
                "kernel `{}` declares no storage bindings but {} arguments were bound",
                program.entry_point,
                args.len()
            )));
        }

        let deadline = timeout.map(|t| Instant::now() + t);

        let index = self.scoped(Error::Execution, || {
            let bind_group = program.bind_group_layout.as_ref().map(|layout| {
                let entries: Vec<wgpu::BindGroupEntry<'_>> = args
                    .iter()
                    .enumerate()
                    .map(|(slot, arg)| wgpu::BindGroupEntry {
                        binding: slot as u32,
                        resource: arg.buffer.as_entire_binding(),
                    })
                    .collect();

                self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("kernel-args"),
                    layout,
                    entries: &entries,
                })
            });

            let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("kernel-encoder"),
            });

            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("kernel-pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&program.pipeline);
                if let Some(bind_group) = &bind_group {
                    pass.set_bind_group(0, bind_group, &[]);
                }
                if groups > 0 {
                    pass.dispatch_workgroups(groups, 1, 1);
                }
            }

            self.queue.submit(Some(encoder.finish()))
        })?;

        self.wait_for(index, deadline)
    }

    fn read(&self, buffer: &WgpuBuffer) -> Result<Vec<u8>> {
        let padded = buffer.buffer.size();

        // The scope lock is released before polling
        let staging = self.scoped(Error::Execution, || {
            let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("kernel-readback"),
                size: padded,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });

            let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("kernel-readback-encoder"),
            });
            encoder.copy_buffer_to_buffer(&buffer.buffer, 0, &staging, 0, padded);
            self.queue.submit(Some(encoder.finish()));
            staging
        })?;

        let slice = staging.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);

        block_on(receiver)
            .map_err(|_| Error::execution("readback mapping was cancelled"))?
            .map_err(|e| Error::execution(format!("failed to map output buffer: {}", e)))?;

        let data = slice.get_mapped_range()[..buffer.size as usize].to_vec();
        staging.unmap();

        Ok(data)
    }
}

/// Storage bindings must be non-empty and 4-byte aligned.
fn padded_size(size: u64) -> u64 {
    size.max(4).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT)
}
