//! Worker Pool
//!
//! N workers sharing one set of hooks, brought online and offline as a unit.

use std::fmt;

use tracing::{info, warn};

use crate::config::WorkerPoolConfig;
use crate::error::PoolSetupError;
use crate::worker::{Worker, WorkerOps, WorkerStats};

/// A fixed set of workers
pub struct WorkerPool {
    workers: Vec<Worker>,
    config: WorkerPoolConfig,
}

impl WorkerPool {
    /// Create the workers without starting them
    pub fn new(config: WorkerPoolConfig, ops: WorkerOps) -> Self {
        let workers = (0..config.workers)
            .map(|index| {
                Worker::with_cpu(index, config.cpu_for(index), config.worker.clone(), ops.clone())
            })
            .collect();
        Self { workers, config }
    }

    /// Create the workers and bring them online.
    ///
    /// On failure the partially started pool is handed back with the error;
    /// it still needs [`teardown`](Self::teardown) (or dropping).
    pub fn setup_with(
        config: WorkerPoolConfig,
        ops: WorkerOps,
    ) -> Result<Self, (Self, PoolSetupError)> {
        let pool = Self::new(config, ops);
        match pool.setup() {
            Ok(()) => Ok(pool),
            Err(e) => Err((pool, e)),
        }
    }

    /// Start every worker in order, stopping at the first failure.
    ///
    /// Workers started before the failure keep running; there is no
    /// implicit rollback.
    pub fn setup(&self) -> Result<(), PoolSetupError> {
        for (index, worker) in self.workers.iter().enumerate() {
            if let Err(source) = worker.start() {
                warn!(index, error = %source, "worker pool setup failed");
                return Err(PoolSetupError {
                    index,
                    workers: self.workers.len(),
                    source,
                });
            }
        }
        info!(workers = self.workers.len(), "worker pool online");
        Ok(())
    }

    /// Stop and join every worker. Safe to call more than once.
    pub fn teardown(&self) {
        for worker in &self.workers {
            worker.stop();
        }
        info!(workers = self.workers.len(), "worker pool offline");
    }

    /// Number of workers
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Check if the pool has no workers
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Worker at `index`
    pub fn worker(&self, index: usize) -> Option<&Worker> {
        self.workers.get(index)
    }

    /// All workers
    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    /// Configuration the pool was built with
    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// Per-worker counters
    pub fn stats(&self) -> Vec<WorkerStats> {
        self.workers.iter().map(Worker::stats).collect()
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .finish()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Job;
    use crate::worker::WorkerState;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_pool_lifecycle() {
        let pool = WorkerPool::new(WorkerPoolConfig::new(3), WorkerOps::new());
        assert_eq!(pool.len(), 3);
        assert!(pool.workers().iter().all(|w| w.state() == WorkerState::Created));

        pool.setup().unwrap();
        assert!(pool.workers().iter().all(Worker::is_running));

        pool.teardown();
        assert!(pool.workers().iter().all(|w| w.state() == WorkerState::Stopped));
        pool.teardown();
    }

    #[test]
    fn test_shared_ops_and_affinity() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_in = Arc::clone(&seen);
        let ops = WorkerOps::new().on_init(move |ctx| {
            seen_in.lock().push((ctx.index(), ctx.cpu()));
            Ok(())
        });

        let pool = WorkerPool::new(WorkerPoolConfig::new(3).affinity([4, 5]), ops);
        pool.setup().unwrap();

        let mut seen = seen.lock().clone();
        seen.sort();
        assert_eq!(seen, vec![(0, Some(4)), (1, Some(5)), (2, Some(4))]);
    }

    #[test]
    fn test_setup_twice_reports_first_worker() {
        let pool = WorkerPool::new(WorkerPoolConfig::new(2), WorkerOps::new());
        pool.setup().unwrap();

        let err = pool.setup().unwrap_err();
        assert_eq!(err.index, 0);
        assert_eq!(err.workers, 2);
        pool.teardown();
    }

    #[test]
    fn test_partial_setup_needs_teardown() {
        let pool = WorkerPool::new(WorkerPoolConfig::new(3), WorkerOps::new());
        // Worker 1 already consumed its start
        pool.worker(1).unwrap().start().unwrap();

        let err = pool.setup().unwrap_err();
        assert_eq!(err.index, 1);
        assert!(pool.worker(0).unwrap().is_running());
        assert_eq!(pool.worker(2).unwrap().state(), WorkerState::Created);

        pool.teardown();
        assert!(pool.workers().iter().all(|w| w.state() == WorkerState::Stopped));
    }

    #[test]
    fn test_drop_drains_workers() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = WorkerPool::new(WorkerPoolConfig::new(2), WorkerOps::new());
            pool.setup().unwrap();
            for i in 0..20 {
                let counter = Arc::clone(&counter);
                pool.worker(i % 2).unwrap().enqueue(Job::from_fn(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }));
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }
}
