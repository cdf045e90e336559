//! Vector add on the GPU, driven through the request facade

#[cfg(feature = "gpu")]
use kernel_session::prelude::*;
#[cfg(feature = "gpu")]
use serde_json::json;
#[cfg(feature = "gpu")]
use std::sync::Arc;

#[cfg(feature = "gpu")]
const VECTOR_ADD: &str = r#"
@group(0) @binding(0) var<storage, read> a: array<u32>;
@group(0) @binding(1) var<storage, read> b: array<u32>;
@group(0) @binding(2) var<storage, read_write> sum: array<u32>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i < arrayLength(&sum)) {
        sum[i] = a[i] + b[i];
    }
}
"#;

#[cfg(feature = "gpu")]
fn show(label: &str, response: &ApiResponse) {
    println!("{:<8} {} {}", label, response.status, response.to_json());
}

#[cfg(feature = "gpu")]
fn main() -> kernel_session::Result<()> {
    let device = match WgpuDevice::get_or_init() {
        Ok(device) => device,
        Err(e) => {
            eprintln!("No GPU available: {}", e);
            return Ok(());
        }
    };
    println!("Adapter: {}\n", device.adapter_info().name);

    let registry = Arc::new(SessionRegistry::new(device, Config::default())?);
    let service = ComputeService::new(Arc::clone(&registry))?;

    let body = json!({ "source": VECTOR_ADD, "type": 0, "outputs": [16] }).to_string();
    let created = service.handle(Method::Post, "/create", Some(&body));
    show("create", &created);
    let Some(uuid) = created.uuid else {
        return Ok(());
    };

    for data in ["[1, 2, 3, 4]", "[10, 20, 30, 40]"] {
        let body = format!(r#"{{"update": "input", "data": {}}}"#, data);
        show("input", &service.handle(Method::Put, &format!("/update/{}", uuid), Some(&body)));
    }

    show("compute", &service.handle(Method::Post, &format!("/compute/{}", uuid), None));
    show("output", &service.handle(Method::Get, &format!("/output/{}/0", uuid), None));
    show("info", &service.handle(Method::Get, &format!("/{}", uuid), None));
    show("close", &service.handle(Method::Delete, &format!("/{}", uuid), None));

    println!("\nLive sessions: {}", registry.len());
    Ok(())
}

#[cfg(not(feature = "gpu"))]
fn main() {
    println!("This example requires the 'gpu' feature.");
    println!("Run with: cargo run --example wgpu_add --features gpu");
}
