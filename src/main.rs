//! kernel-session CLI - list adapters, run a WGSL kernel, replay façade requests.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kernel_session::device::WgpuDevice;
use kernel_session::service::{ComputeService, ServiceRequest};
use kernel_session::{Config, DataType, Elements, SessionRegistry, SessionSpec};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "kernel-session")]
#[command(about = "Session manager for remotely addressable GPU compute kernels", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the GPU adapters wgpu can see
    Devices,
    /// Compile a WGSL kernel, bind inputs, execute once and print the outputs
    Run {
        /// Path to the WGSL source
        #[arg(value_name = "KERNEL")]
        kernel: PathBuf,

        /// Element type: uint32 or float
        #[arg(short = 't', long = "type", default_value = "uint32")]
        data_type: String,

        /// Entry point name
        #[arg(short, long)]
        entry_point: Option<String>,

        /// Input array as comma-separated values (repeat for each input)
        #[arg(short, long = "input", value_name = "VALUES")]
        inputs: Vec<String>,

        /// Output buffer size in bytes (repeat for each output)
        #[arg(short, long = "output", value_name = "BYTES", required = true)]
        outputs: Vec<u64>,

        /// Execution deadline in milliseconds
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,

        /// Write a metrics snapshot as JSON after the run
        #[arg(long, value_name = "FILE")]
        metrics: Option<PathBuf>,
    },
    /// Drive the request façade with a JSON array of {method, path, body}
    Replay {
        /// Path to the request script
        #[arg(value_name = "SCRIPT")]
        script: PathBuf,

        /// Evict sessions idle for this many seconds
        #[arg(long, value_name = "SECS")]
        idle_timeout: Option<u64>,

        /// Print a metrics summary at the end
        #[arg(long)]
        stats: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Devices => cmd_devices(),
        Commands::Run {
            kernel,
            data_type,
            entry_point,
            inputs,
            outputs,
            timeout_ms,
            metrics,
        } => cmd_run(kernel, &data_type, entry_point, inputs, outputs, timeout_ms, metrics),
        Commands::Replay {
            script,
            idle_timeout,
            stats,
        } => cmd_replay(script, idle_timeout, stats),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init();
}

fn cmd_devices() -> Result<()> {
    let adapters = WgpuDevice::enumerate_adapters(wgpu::Backends::all());
    if adapters.is_empty() {
        println!("No adapters found");
        return Ok(());
    }

    for (i, info) in adapters.iter().enumerate() {
        println!(
            "{}: {} ({:?}, {:?}, driver: {})",
            i, info.name, info.backend, info.device_type, info.driver
        );
    }
    Ok(())
}

fn cmd_run(
    kernel_path: PathBuf,
    data_type: &str,
    entry_point: Option<String>,
    inputs: Vec<String>,
    outputs: Vec<u64>,
    timeout_ms: Option<u64>,
    metrics_path: Option<PathBuf>,
) -> Result<()> {
    let source = std::fs::read_to_string(&kernel_path)
        .with_context(|| format!("Failed to read kernel from {}", kernel_path.display()))?;
    let data_type: DataType = data_type.parse()?;

    let mut config = Config::builder();
    if let Some(ms) = timeout_ms {
        config = config.execute_timeout(Duration::from_millis(ms));
    }
    let config = config.build()?;

    let device = WgpuDevice::get_or_init().context("Failed to initialize GPU device")?;
    tracing::info!(adapter = %device.adapter_info().name, "using adapter");
    let registry = SessionRegistry::new(device, config)?;

    let mut spec = SessionSpec::new(source, data_type).outputs(outputs);
    if let Some(name) = entry_point {
        spec = spec.entry_point(name);
    }
    let id = registry.create(spec).context("Failed to create session")?;

    for (i, text) in inputs.iter().enumerate() {
        let elements = parse_elements(data_type, text)
            .with_context(|| format!("Invalid input {}", i))?;
        registry.bind_input(&id, elements)?;
    }

    registry.execute(&id).context("Kernel execution failed")?;

    let output_count = registry.info(&id)?.outputs.len();
    for index in 0..output_count {
        let elements = registry.read_output(&id, index)?;
        println!("output {}: {}", index, serde_json::to_string(&elements)?);
    }

    if let Some(path) = metrics_path {
        use kernel_session::telemetry::{JsonExporter, MetricsExporter};
        JsonExporter::new(&path)
            .export(&registry.metrics())
            .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
    }

    registry.close(&id)?;
    Ok(())
}

fn parse_elements(data_type: DataType, text: &str) -> Result<Elements> {
    let values = text.split(',').map(str::trim).filter(|v| !v.is_empty());
    let elements = match data_type {
        DataType::Uint32 => Elements::Uint32(
            values
                .map(|v| v.parse::<u32>().with_context(|| format!("'{}' is not a uint32", v)))
                .collect::<Result<_>>()?,
        ),
        DataType::Float => Elements::Float(
            values
                .map(|v| v.parse::<f32>().with_context(|| format!("'{}' is not a float", v)))
                .collect::<Result<_>>()?,
        ),
    };
    Ok(elements)
}

fn cmd_replay(script_path: PathBuf, idle_timeout: Option<u64>, stats: bool) -> Result<()> {
    let script = std::fs::read_to_string(&script_path)
        .with_context(|| format!("Failed to read script from {}", script_path.display()))?;
    let requests: Vec<ServiceRequest> =
        serde_json::from_str(&script).with_context(|| "Failed to parse request script")?;

    let mut config = Config::builder();
    if let Some(secs) = idle_timeout {
        config = config.idle_timeout(Duration::from_secs(secs));
    }
    let config = config.build()?;

    let device = WgpuDevice::get_or_init().context("Failed to initialize GPU device")?;
    let registry = Arc::new(SessionRegistry::new(device, config)?);
    let service = ComputeService::new(Arc::clone(&registry))?;

    // Later requests may refer to the session created by an earlier one as
    // `{uuid}` in their path
    let mut last_uuid: Option<String> = None;
    for mut request in requests {
        if let Some(uuid) = &last_uuid {
            request.path = request.path.replace("{uuid}", uuid);
        }

        let response = service.handle_request(&request);
        if let Some(uuid) = &response.uuid {
            last_uuid = Some(uuid.clone());
        }
        println!(
            "{} {} -> {} {}",
            request.method,
            request.path,
            response.status,
            serde_json::to_string(&response.to_json())?
        );
    }

    if stats {
        use kernel_session::telemetry::{ConsoleExporter, MetricsExporter};
        ConsoleExporter::new(true).export(&registry.metrics())?;
    }

    Ok(())
}
