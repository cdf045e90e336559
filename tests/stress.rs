//! Long-running load tests. Run with `cargo test --test stress -- --ignored`.

mod common;

use common::{add_spec, registry};
use kernel_session::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
#[ignore]
fn stress_many_sessions_many_threads() {
    let registry = registry(Config::default());
    let completed = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let handles: Vec<_> = (0..16)
        .map(|t| {
            let registry = Arc::clone(&registry);
            let completed = Arc::clone(&completed);
            thread::spawn(move || {
                for round in 0..500u32 {
                    let id = registry.create(add_spec()).unwrap();
                    registry.bind_input(&id, vec![t, round, 1, 2].into()).unwrap();
                    registry.bind_input(&id, vec![1u32; 4].into()).unwrap();
                    registry.execute(&id).unwrap();

                    let output = registry.read_output(&id, 0).unwrap();
                    assert_eq!(output, Elements::Uint32(vec![t + 1, round + 1, 2, 3]));

                    registry.close(&id).unwrap();
                    completed.fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    println!(
        "{} session lifecycles in {:?}",
        completed.load(Ordering::Relaxed),
        start.elapsed()
    );
    assert_eq!(completed.load(Ordering::Relaxed), 16 * 500);
    assert!(registry.is_empty());
}

#[test]
#[ignore]
fn stress_shared_session_contention() {
    let registry = registry(Config::default());
    let id = registry.create(add_spec()).unwrap();
    registry.bind_input(&id, vec![1u32; 4].into()).unwrap();
    registry.bind_input(&id, vec![1u32; 4].into()).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let id = id.clone();
            thread::spawn(move || {
                for _ in 0..1000 {
                    registry.execute(&id).unwrap();
                    // Another thread may have executed in between, but never
                    // with different inputs
                    assert_eq!(
                        registry.read_output(&id, 0).unwrap(),
                        Elements::Uint32(vec![2; 4])
                    );
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
#[ignore]
fn stress_reaper_under_load() {
    let config = Config::builder()
        .idle_timeout(Duration::from_millis(10))
        .sweep_interval(Duration::from_millis(2))
        .build()
        .unwrap();
    let registry = registry(config);
    let _reaper = SessionReaper::spawn(&registry).unwrap();

    for _ in 0..2000 {
        let id = registry.create(add_spec()).unwrap();
        // May race with eviction; both outcomes are valid
        match registry.bind_input(&id, vec![1u32].into()) {
            Ok(_) => {}
            Err(e) => assert_eq!(e.kind(), ErrorKind::NotFound),
        }
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while !registry.is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(registry.is_empty());
}
