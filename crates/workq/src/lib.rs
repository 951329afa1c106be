//! workq
//!
//! Job dispatch for long-lived worker threads.
//!
//! # Goals
//! - Producers never block: one lock-free MPSC queue per worker
//! - Job memory comes from a bounded [`MemoryPool`] with explicit backpressure
//! - Dequeued nodes are reclaimed only after an epoch grace period
//! - Job memory goes back to its pool as soon as the job has run
//! - Pluggable queue selection across a [`WorkerPool`]
//!
//! # Example
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use workq::{DispatchManager, Job, MemoryPool, Policy, WorkerOps, WorkerPool, WorkerPoolConfig};
//!
//! let slices = MemoryPool::new("jobs", 64, 16);
//! let pool = Arc::new(WorkerPool::new(WorkerPoolConfig::new(2), WorkerOps::new()));
//! pool.setup()?;
//!
//! let manager = DispatchManager::new(Arc::clone(&pool), Policy::RoundRobin);
//! let done = Arc::new(AtomicUsize::new(0));
//! for i in 0..8u8 {
//!     let mut slice = slices.alloc()?;
//!     slice[0] = i;
//!     let done = Arc::clone(&done);
//!     manager.submit(Job::new(slice, move |slice, _ctx| {
//!         done.fetch_add(slice[0] as usize, Ordering::SeqCst);
//!     }));
//! }
//!
//! pool.teardown();
//! assert_eq!(done.load(Ordering::SeqCst), 28);
//! # Ok::<(), workq::Error>(())
//! ```

mod config;
pub mod dispatch;
mod error;
mod job;
mod pool;
pub mod queue;
mod worker;

pub use config::{EnqueueMode, WaitMode, WorkerConfig, WorkerPoolConfig};
pub use dispatch::{
    DispatchManager, DispatchPolicy, Policy, QueueLoads, RoundRobin, RoundRobinIdleSkip,
};
pub use error::{Error, PoolSetupError, Result, WorkerError};
pub use job::{Job, Task};
pub use pool::WorkerPool;
pub use queue::MpscQueue;
pub use worker::{ExitHook, InitHook, Worker, WorkerContext, WorkerOps, WorkerState, WorkerStats};

// Re-export the memory pool crate
pub use workq_mempool as mempool;
pub use workq_mempool::{MemoryPool, PoolError, Slice};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
