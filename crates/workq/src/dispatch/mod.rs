//! Dispatch
//!
//! A [`DispatchManager`] fans submitted jobs out over the queues of a
//! [`WorkerPool`], asking a [`DispatchPolicy`] which queue gets each job.
//! Policies only see a [`QueueLoads`] view, so new ones (least-loaded,
//! hash affinity, ...) plug in without touching the pool or the queues.

mod idle_skip;
mod round_robin;

pub use idle_skip::RoundRobinIdleSkip;
pub use round_robin::RoundRobin;

use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::job::Job;
use crate::pool::WorkerPool;

/// Read-only view of a set of queues for policy decisions
pub trait QueueLoads {
    /// Number of queues
    fn len(&self) -> usize;

    /// Load signal of queue `index`; lower is less loaded
    fn load(&self, index: usize) -> usize;

    /// Check if there are no queues
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl QueueLoads for WorkerPool {
    fn len(&self) -> usize {
        WorkerPool::len(self)
    }

    fn load(&self, index: usize) -> usize {
        self.worker(index).map_or(usize::MAX, |w| w.load())
    }
}

impl<const N: usize> QueueLoads for [usize; N] {
    fn len(&self) -> usize {
        N
    }

    fn load(&self, index: usize) -> usize {
        self[index]
    }
}

impl QueueLoads for Vec<usize> {
    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn load(&self, index: usize) -> usize {
        self[index]
    }
}

/// Queue selection strategy
pub trait DispatchPolicy: Send + Sync {
    /// Short name for diagnostics
    fn name(&self) -> &'static str;

    /// Called once when the manager is built
    fn init(&self, _queues: &dyn QueueLoads) {}

    /// Called once when the manager goes away
    fn exit(&self, _queues: &dyn QueueLoads) {}

    /// Pick the queue for the next job; must be in `0..queues.len()`
    fn select(&self, queues: &dyn QueueLoads) -> usize;
}

/// Built-in policies, selected at manager construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Policy {
    /// Plain rotation. Assumes jobs of similar cost.
    #[default]
    RoundRobin,
    /// Rotation that steps around busier queues
    RoundRobinIdleSkip,
}

impl Policy {
    fn build(self) -> Box<dyn DispatchPolicy> {
        match self {
            Self::RoundRobin => Box::new(RoundRobin::new()),
            Self::RoundRobinIdleSkip => Box::new(RoundRobinIdleSkip::new()),
        }
    }
}

/// Assigns jobs to the queues of a shared worker pool
pub struct DispatchManager {
    pool: Arc<WorkerPool>,
    policy: Box<dyn DispatchPolicy>,
}

impl DispatchManager {
    /// Manager using one of the built-in policies
    pub fn new(pool: Arc<WorkerPool>, policy: Policy) -> Self {
        Self::with_policy(pool, policy.build())
    }

    /// Manager using a custom policy.
    ///
    /// Panics if the pool has no workers.
    pub fn with_policy(pool: Arc<WorkerPool>, policy: Box<dyn DispatchPolicy>) -> Self {
        assert!(!pool.is_empty(), "dispatch manager needs at least one worker");
        policy.init(&*pool);
        debug!(policy = policy.name(), queues = pool.len(), "dispatch manager ready");
        Self { pool, policy }
    }

    /// Hand a job to the queue chosen by the policy. Returns that queue's index.
    pub fn submit(&self, job: Job) -> usize {
        let index = self.policy.select(&*self.pool);
        let Some(worker) = self.pool.worker(index) else {
            panic!(
                "policy {} selected queue {} of {}",
                self.policy.name(),
                index,
                self.pool.len()
            );
        };
        trace!(queue = index, "job dispatched");
        worker.enqueue(job);
        index
    }

    /// The pool jobs are dispatched to
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Active policy name
    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }
}

impl fmt::Debug for DispatchManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchManager")
            .field("policy", &self.policy.name())
            .field("queues", &self.pool.len())
            .finish()
    }
}

impl Drop for DispatchManager {
    fn drop(&mut self) {
        self.policy.exit(&*self.pool);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerPoolConfig;
    use crate::worker::WorkerOps;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Always the last queue
    struct LastQueue {
        exits: Arc<AtomicUsize>,
    }

    impl DispatchPolicy for LastQueue {
        fn name(&self) -> &'static str {
            "last"
        }

        fn exit(&self, _queues: &dyn QueueLoads) {
            self.exits.fetch_add(1, Ordering::SeqCst);
        }

        fn select(&self, queues: &dyn QueueLoads) -> usize {
            queues.len() - 1
        }
    }

    #[test]
    fn test_custom_policy_plugs_in() {
        let pool = Arc::new(WorkerPool::new(WorkerPoolConfig::new(3), WorkerOps::new()));
        let exits = Arc::new(AtomicUsize::new(0));
        let manager = DispatchManager::with_policy(
            Arc::clone(&pool),
            Box::new(LastQueue {
                exits: Arc::clone(&exits),
            }),
        );
        assert_eq!(manager.policy_name(), "last");

        // Workers not started: jobs stay linked where the policy put them
        for _ in 0..4 {
            assert_eq!(manager.submit(Job::from_fn(|_| {})), 2);
        }
        assert_eq!(pool.worker(2).unwrap().depth(), 4);
        assert_eq!(pool.worker(0).unwrap().depth(), 0);

        drop(manager);
        assert_eq!(exits.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[should_panic(expected = "at least one worker")]
    fn test_empty_pool_rejected() {
        let pool = Arc::new(WorkerPool::new(WorkerPoolConfig::new(0), WorkerOps::new()));
        DispatchManager::new(pool, Policy::RoundRobin);
    }

    #[test]
    fn test_static_loads_view() {
        let loads = [3usize, 0, 7];
        let view: &dyn QueueLoads = &loads;
        assert_eq!(view.len(), 3);
        assert_eq!(view.load(2), 7);
        assert!(!view.is_empty());

        let dynamic: Vec<usize> = Vec::new();
        assert!(QueueLoads::is_empty(&dynamic));
    }
}
