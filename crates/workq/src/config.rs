//! Worker Configuration

use std::time::Duration;

/// How a producer wakes the worker after linking a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EnqueueMode {
    /// Signal while holding the worker mutex. No missed wakeups, more contention.
    #[default]
    Blocked,
    /// Signal without the mutex. Lower latency; a wakeup that slips past a
    /// worker about to sleep is only recovered by [`WaitMode::Poll`].
    LockFree,
}

/// How an idle worker waits for the next job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WaitMode {
    /// Sleep until signalled
    Signal,
    /// Sleep at most this long, then re-check the queue and stop flag
    Poll(Duration),
}

impl Default for WaitMode {
    fn default() -> Self {
        Self::Poll(Duration::from_millis(1))
    }
}

/// Per-worker configuration
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WorkerConfig {
    /// Thread name prefix; workers are named `{prefix}-{index}`
    pub name_prefix: String,

    /// Enqueue signalling mode
    pub enqueue: EnqueueMode,

    /// Drain-wait mode
    pub wait: WaitMode,

    /// Advisory queue depth; crossing it logs a warning, never rejects
    pub queue_capacity: usize,

    /// Thread stack size (None = platform default)
    pub stack_size: Option<usize>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name_prefix: "workq".to_string(),
            enqueue: EnqueueMode::default(),
            wait: WaitMode::default(),
            queue_capacity: 1024,
            stack_size: None,
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WorkerPoolConfig {
    /// Number of workers
    pub workers: usize,

    /// CPU ids handed to workers in rotation (empty = no affinity hint).
    /// Applying them is up to the init hook.
    pub affinity: Vec<usize>,

    /// Settings shared by every worker
    pub worker: WorkerConfig,
}

impl WorkerPoolConfig {
    /// Pool of `workers` workers with default settings
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    /// Set the advisory per-worker queue depth
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.worker.queue_capacity = capacity;
        self
    }

    /// Set the CPU rotation table
    pub fn affinity(mut self, cpus: impl IntoIterator<Item = usize>) -> Self {
        self.affinity = cpus.into_iter().collect();
        self
    }

    /// Set the enqueue signalling mode
    pub fn enqueue_mode(mut self, mode: EnqueueMode) -> Self {
        self.worker.enqueue = mode;
        self
    }

    /// Set the drain-wait mode
    pub fn wait_mode(mut self, mode: WaitMode) -> Self {
        self.worker.wait = mode;
        self
    }

    /// CPU hint for worker `index`
    pub fn cpu_for(&self, index: usize) -> Option<usize> {
        if self.affinity.is_empty() {
            None
        } else {
            Some(self.affinity[index % self.affinity.len()])
        }
    }
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(4);
        Self {
            workers,
            affinity: Vec::new(),
            worker: WorkerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_affinity_rotation() {
        let config = WorkerPoolConfig::new(5).affinity([2, 3]);
        let cpus: Vec<_> = (0..5).map(|i| config.cpu_for(i)).collect();
        assert_eq!(cpus, vec![Some(2), Some(3), Some(2), Some(3), Some(2)]);

        assert_eq!(WorkerPoolConfig::new(2).cpu_for(1), None);
    }

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.enqueue, EnqueueMode::Blocked);
        assert_eq!(config.wait, WaitMode::Poll(Duration::from_millis(1)));
        assert!(WorkerPoolConfig::default().workers > 0);
    }
}
