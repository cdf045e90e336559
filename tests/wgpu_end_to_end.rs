//! End-to-end runs on a real adapter. Each test returns early when wgpu
//! finds no adapter.

#![cfg(feature = "gpu")]

use kernel_session::prelude::*;
use std::sync::Arc;
use std::time::Duration;

const ADD_U32: &str = r#"
@group(0) @binding(0) var<storage, read> a: array<u32>;
@group(0) @binding(1) var<storage, read> b: array<u32>;
@group(0) @binding(2) var<storage, read_write> c: array<u32>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i < arrayLength(&c)) {
        c[i] = a[i] + b[i];
    }
}
"#;

const SCALE_F32: &str = r#"
@group(0) @binding(0) var<storage, read> x: array<f32>;
@group(0) @binding(1) var<storage, read_write> y: array<f32>;

@compute @workgroup_size(32)
fn scale(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i < arrayLength(&y)) {
        y[i] = x[i] * 2.0;
    }
}
"#;

fn gpu_registry(config: Config) -> Option<SessionRegistry<WgpuDevice>> {
    let device = WgpuDevice::get_or_init().ok()?;
    Some(SessionRegistry::new(device, config).unwrap())
}

#[test]
fn test_add_u32() {
    let Some(registry) = gpu_registry(Config::default()) else {
        return;
    };

    let id = registry
        .create(SessionSpec::new(ADD_U32, DataType::Uint32).outputs(vec![16]))
        .unwrap();
    registry.bind_input(&id, vec![1u32, 2, 3, 4].into()).unwrap();
    registry.bind_input(&id, vec![5u32, 6, 7, 8].into()).unwrap();
    registry.execute(&id).unwrap();

    assert_eq!(
        registry.read_output(&id, 0).unwrap(),
        Elements::Uint32(vec![6, 8, 10, 12])
    );
}

#[test]
fn test_scale_f32_with_entry_point() {
    let Some(registry) = gpu_registry(Config::default()) else {
        return;
    };

    let id = registry
        .create(
            SessionSpec::new(SCALE_F32, DataType::Float)
                .outputs(vec![12])
                .entry_point("scale"),
        )
        .unwrap();
    registry.bind_input(&id, vec![0.5f32, 1.0, -2.0].into()).unwrap();
    registry.execute(&id).unwrap();

    assert_eq!(
        registry.read_output(&id, 0).unwrap(),
        Elements::Float(vec![1.0, 2.0, -4.0])
    );
}

#[test]
fn test_large_work_size() {
    let Some(registry) = gpu_registry(Config::default()) else {
        return;
    };

    let n = 100_000u32;
    let a: Vec<u32> = (0..n).collect();
    let b: Vec<u32> = (0..n).map(|x| x * 2).collect();

    let id = registry
        .create(SessionSpec::new(ADD_U32, DataType::Uint32).outputs(vec![u64::from(n) * 4]))
        .unwrap();
    registry.bind_input(&id, a.into()).unwrap();
    registry.bind_input(&id, b.into()).unwrap();
    registry.execute(&id).unwrap();

    let output = registry.read_output(&id, 0).unwrap();
    let values = output.as_u32().unwrap();
    assert_eq!(values.len(), n as usize);
    assert!(values.iter().enumerate().all(|(i, &v)| v == 3 * i as u32));
}

#[test]
fn test_invalid_wgsl_is_compile_error() {
    let Some(registry) = gpu_registry(Config::default()) else {
        return;
    };

    let err = registry
        .create(SessionSpec::new("@compute fn main( {", DataType::Uint32).outputs(vec![4]))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Compile);

    let err = registry
        .create(SessionSpec::new(ADD_U32, DataType::Uint32).entry_point("missing"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Compile);
    assert!(registry.is_empty());
}

#[test]
fn test_missing_binding_is_execution_error() {
    let Some(registry) = gpu_registry(Config::default()) else {
        return;
    };

    let id = registry
        .create(SessionSpec::new(ADD_U32, DataType::Uint32).outputs(vec![16]))
        .unwrap();
    registry.bind_input(&id, vec![1u32, 2, 3, 4].into()).unwrap();

    // Two arguments bound for a kernel declaring three
    let err = registry.execute(&id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Execution);
    assert!(registry.read_output(&id, 0).is_err());
}

#[test]
fn test_strict_arity_uses_reflection() {
    let Some(registry) = gpu_registry(Config::builder().strict_arity(true).build().unwrap()) else {
        return;
    };

    let err = registry
        .create(SessionSpec::new(ADD_U32, DataType::Uint32).outputs(vec![4, 4, 4, 4]))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn test_shared_device_across_registries() {
    let Ok(first) = WgpuDevice::get_or_init() else {
        return;
    };
    let second = WgpuDevice::get_or_init().unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let a = SessionRegistry::new(first, Config::default()).unwrap();
    let b = SessionRegistry::new(second, Config::default()).unwrap();
    let id = a
        .create(SessionSpec::new(ADD_U32, DataType::Uint32).outputs(vec![4]))
        .unwrap();
    assert!(!b.contains(&id));
}

#[test]
fn test_timeout_config_allows_fast_kernel() {
    let config = Config::builder()
        .execute_timeout(Duration::from_secs(10))
        .build()
        .unwrap();
    let Some(registry) = gpu_registry(config) else {
        return;
    };

    let id = registry
        .create(SessionSpec::new(ADD_U32, DataType::Uint32).outputs(vec![8]))
        .unwrap();
    registry.bind_input(&id, vec![1u32, 1].into()).unwrap();
    registry.bind_input(&id, vec![2u32, 2].into()).unwrap();
    registry.execute(&id).unwrap();

    assert_eq!(registry.read_output(&id, 0).unwrap(), Elements::Uint32(vec![3, 3]));
}

#[test]
fn test_concurrent_readback_and_compile_keep_errors_apart() {
    let Some(registry) = gpu_registry(Config::default()) else {
        return;
    };
    let registry = Arc::new(registry);

    let id = registry
        .create(SessionSpec::new(ADD_U32, DataType::Uint32).outputs(vec![16]))
        .unwrap();
    registry.bind_input(&id, vec![1u32, 2, 3, 4].into()).unwrap();
    registry.bind_input(&id, vec![5u32, 6, 7, 8].into()).unwrap();

    let runner = {
        let registry = Arc::clone(&registry);
        let id = id.clone();
        std::thread::spawn(move || {
            for _ in 0..20 {
                registry.execute(&id).unwrap();
                assert_eq!(
                    registry.read_output(&id, 0).unwrap(),
                    Elements::Uint32(vec![6, 8, 10, 12])
                );
            }
        })
    };

    for _ in 0..20 {
        let err = registry
            .create(SessionSpec::new("@compute fn main( {", DataType::Uint32).outputs(vec![4]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Compile);

        let fresh = registry
            .create(SessionSpec::new(ADD_U32, DataType::Uint32).outputs(vec![4]))
            .unwrap();
        registry.close(&fresh).unwrap();
    }

    runner.join().unwrap();
}
