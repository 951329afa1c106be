//! Pooled jobs fanned out over a worker pool.
//!
//! Run with `RUST_LOG=workq=debug cargo run --example dispatch`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing_subscriber::EnvFilter;
use workq::{DispatchManager, Job, MemoryPool, Policy, WorkerOps, WorkerPool, WorkerPoolConfig};

const JOBS: u64 = 10_000;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let slices = MemoryPool::new("dispatch-demo", 64, 256);
    let ops = WorkerOps::new().on_init(|ctx| {
        tracing::info!(worker = ctx.name(), cpu = ?ctx.cpu(), "init hook");
        Ok(())
    });
    let config = WorkerPoolConfig::new(4).affinity(0..4);
    let pool = match WorkerPool::setup_with(config, ops) {
        Ok(pool) => Arc::new(pool),
        Err((pool, e)) => {
            pool.teardown();
            return Err(e.into());
        }
    };
    let manager = DispatchManager::new(Arc::clone(&pool), Policy::RoundRobinIdleSkip);

    let sum = Arc::new(AtomicU64::new(0));
    let mut backpressure = 0u64;
    let started = Instant::now();

    for n in 0..JOBS {
        let mut slice = loop {
            match slices.alloc() {
                Ok(slice) => break slice,
                Err(e) if e.is_exhausted() => {
                    backpressure += 1;
                    std::thread::sleep(Duration::from_micros(50));
                }
                Err(e) => return Err(e.into()),
            }
        };
        slice[..8].copy_from_slice(&n.to_le_bytes());

        let sum = Arc::clone(&sum);
        manager.submit(Job::new(slice, move |slice, _ctx| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&slice[..8]);
            sum.fetch_add(u64::from_le_bytes(bytes), Ordering::Relaxed);
        }));
    }

    pool.teardown();
    let elapsed = started.elapsed();

    println!("jobs:         {}", JOBS);
    println!("sum:          {}", sum.load(Ordering::Relaxed));
    println!("elapsed:      {:?}", elapsed);
    println!("backpressure: {}", backpressure);
    for stats in pool.stats() {
        println!(
            "worker {}: executed={} peak_drain={} sleeps={}",
            stats.index, stats.executed, stats.peak_drain, stats.sleeps
        );
    }

    drop(manager);
    let stats = slices.exit();
    println!(
        "pool {}: total={} free={} failures={} outstanding={}",
        stats.name, stats.total, stats.free, stats.failures, stats.outstanding
    );
    Ok(())
}
