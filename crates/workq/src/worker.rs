//! Worker
//!
//! One OS thread draining one lock-free job queue.
//!
//! Lifecycle: `Created → Running → StopRequested → Stopped`. `start` returns
//! once the thread has published its running flag; `stop` keeps raising the
//! exit flag and signalling until the thread acknowledges, then joins it.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_epoch as epoch;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::{EnqueueMode, WaitMode, WorkerConfig};
use crate::error::WorkerError;
use crate::job::Job;
use crate::queue::MpscQueue;

/// Identity of a worker as seen by hooks and jobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerContext {
    index: usize,
    name: String,
    cpu: Option<usize>,
}

impl WorkerContext {
    fn new(index: usize, name: String, cpu: Option<usize>) -> Self {
        Self { index, name, cpu }
    }

    /// Context not bound to any thread, for driving tasks by hand
    pub fn detached(index: usize) -> Self {
        Self::new(index, format!("detached-{}", index), None)
    }

    /// Position of the worker in its pool
    pub fn index(&self) -> usize {
        self.index
    }

    /// Thread name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// CPU hint from the pool's affinity table
    pub fn cpu(&self) -> Option<usize> {
        self.cpu
    }
}

/// Worker init hook. An error is fatal for the worker.
pub type InitHook = Arc<dyn Fn(&WorkerContext) -> anyhow::Result<()> + Send + Sync>;

/// Worker exit hook
pub type ExitHook = Arc<dyn Fn(&WorkerContext) + Send + Sync>;

/// Hooks run on the worker thread around its drain loop
#[derive(Clone, Default)]
pub struct WorkerOps {
    init: Option<InitHook>,
    exit: Option<ExitHook>,
}

impl WorkerOps {
    /// No hooks
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` before the worker accepts jobs (affinity, registration, ...)
    pub fn on_init<F>(mut self, f: F) -> Self
    where
        F: Fn(&WorkerContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.init = Some(Arc::new(f));
        self
    }

    /// Run `f` after the final drain
    pub fn on_exit<F>(mut self, f: F) -> Self
    where
        F: Fn(&WorkerContext) + Send + Sync + 'static,
    {
        self.exit = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for WorkerOps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerOps")
            .field("init", &self.init.is_some())
            .field("exit", &self.exit.is_some())
            .finish()
    }
}

/// Worker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Created = 0,
    Running = 1,
    StopRequested = 2,
    Stopped = 3,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Running,
            2 => Self::StopRequested,
            _ => Self::Stopped,
        }
    }
}

/// Worker counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct WorkerStats {
    pub index: usize,
    /// Jobs executed and released so far
    pub executed: u64,
    /// Largest number of jobs executed in one drain pass
    pub peak_drain: usize,
    /// Times the worker went to sleep
    pub sleeps: u64,
    /// Jobs linked but not yet dequeued
    pub depth: usize,
}

/// State shared between the handle and the worker thread
struct Shared {
    ctx: WorkerContext,
    config: WorkerConfig,
    queue: MpscQueue<Job>,

    state: AtomicU8,
    running: AtomicBool,
    exit: AtomicBool,
    exit_ack: AtomicBool,
    busy: AtomicBool,
    over_capacity: AtomicBool,

    mutex: Mutex<()>,
    cond: Condvar,

    executed: AtomicU64,
    peak_drain: AtomicUsize,
    sleeps: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Run everything currently linked. Returns how many jobs ran.
    fn drain(&self) -> usize {
        let mut drained = 0;
        loop {
            self.busy.store(true, Ordering::Relaxed);
            let job = self.queue.pop(&epoch::pin());
            let Some(mut job) = job else {
                self.busy.store(false, Ordering::Relaxed);
                break;
            };

            // The job was moved out of its node; the node itself waits out
            // its grace period in `MpscQueue::pop`
            job.execute(&self.ctx);
            job.release();
            self.executed.fetch_add(1, Ordering::Release);
            drained += 1;
        }

        if drained > 0 {
            self.peak_drain.fetch_max(drained, Ordering::Relaxed);
            self.over_capacity.store(false, Ordering::Relaxed);
            // Hand retired nodes to the global collector before sleeping
            epoch::pin().flush();
        }
        drained
    }

    fn wait(&self) {
        let mut guard = self.mutex.lock();

        // Blocked-mode producers signal under the mutex, so this check cannot miss them.
        // The length counter is bumped before linking and needs no epoch pin here.
        if self.exit.load(Ordering::Acquire) || self.queue.len() > 0 {
            return;
        }

        self.sleeps.fetch_add(1, Ordering::Relaxed);
        match self.config.wait {
            WaitMode::Signal => self.cond.wait(&mut guard),
            WaitMode::Poll(timeout) => {
                let _ = self.cond.wait_for(&mut guard, timeout);
            }
        }
    }

    fn signal(&self) {
        match self.config.enqueue {
            EnqueueMode::Blocked => {
                let _guard = self.mutex.lock();
                self.cond.notify_one();
            }
            EnqueueMode::LockFree => {
                self.cond.notify_one();
            }
        }
    }
}

fn worker_main(shared: Arc<Shared>, ops: WorkerOps) {
    let ctx = &shared.ctx;

    if let Some(init) = &ops.init {
        if let Err(e) = init(ctx) {
            error!(worker = %ctx.name, error = %e, "worker init hook failed");
            panic!("worker {} init hook failed: {:#}", ctx.name, e);
        }
    }

    shared.running.store(true, Ordering::Release);
    debug!(worker = %ctx.name, "worker loop entered");

    while !shared.exit.load(Ordering::Acquire) {
        shared.drain();
        shared.wait();
    }

    // Everything already linked still runs
    shared.drain();

    info!(
        worker = %ctx.name,
        executed = shared.executed.load(Ordering::Relaxed),
        peak_drain = shared.peak_drain.load(Ordering::Relaxed),
        sleeps = shared.sleeps.load(Ordering::Relaxed),
        "worker offline"
    );

    if let Some(exit) = &ops.exit {
        exit(ctx);
    }

    epoch::pin().flush();
    shared.exit_ack.store(true, Ordering::Release);
}

/// A worker thread with its own job queue
pub struct Worker {
    shared: Arc<Shared>,
    ops: WorkerOps,
    /// Serializes lifecycle transitions
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    /// Create a worker in the `Created` state
    pub fn new(index: usize, config: WorkerConfig, ops: WorkerOps) -> Self {
        Self::with_cpu(index, None, config, ops)
    }

    /// Create a worker carrying a CPU hint for its init hook
    pub fn with_cpu(
        index: usize,
        cpu: Option<usize>,
        config: WorkerConfig,
        ops: WorkerOps,
    ) -> Self {
        let name = format!("{}-{}", config.name_prefix, index);
        Self {
            shared: Arc::new(Shared {
                ctx: WorkerContext::new(index, name, cpu),
                config,
                queue: MpscQueue::new(),
                state: AtomicU8::new(WorkerState::Created as u8),
                running: AtomicBool::new(false),
                exit: AtomicBool::new(false),
                exit_ack: AtomicBool::new(false),
                busy: AtomicBool::new(false),
                over_capacity: AtomicBool::new(false),
                mutex: Mutex::new(()),
                cond: Condvar::new(),
                executed: AtomicU64::new(0),
                peak_drain: AtomicUsize::new(0),
                sleeps: AtomicU64::new(0),
            }),
            ops,
            thread: Mutex::new(None),
        }
    }

    /// Spawn the worker thread and wait until it is live.
    ///
    /// Panics if the init hook fails: a worker that could not initialize
    /// is not trusted with jobs.
    pub fn start(&self) -> Result<(), WorkerError> {
        let mut thread_slot = self.thread.lock();
        let name = self.shared.ctx.name.clone();

        let state = self.shared.state();
        if state != WorkerState::Created {
            return Err(WorkerError::InvalidState {
                worker: name,
                state,
            });
        }

        let mut builder = thread::Builder::new().name(name.clone());
        if let Some(size) = self.shared.config.stack_size {
            builder = builder.stack_size(size);
        }

        let shared = Arc::clone(&self.shared);
        let ops = self.ops.clone();
        let handle = builder
            .spawn(move || worker_main(shared, ops))
            .map_err(|source| WorkerError::Spawn {
                worker: name.clone(),
                source,
            })?;

        while !self.shared.running.load(Ordering::Acquire) {
            if handle.is_finished() {
                let _ = handle.join();
                self.shared.set_state(WorkerState::Stopped);
                panic!("worker {} died before coming online", name);
            }
            std::hint::spin_loop();
        }

        *thread_slot = Some(handle);
        self.shared.set_state(WorkerState::Running);
        info!(worker = %name, cpu = ?self.shared.ctx.cpu, "worker online");
        Ok(())
    }

    /// Ask the worker to finish, wait for it, and join its thread.
    ///
    /// Jobs linked before the worker acknowledged still execute; jobs that
    /// raced past the final drain are released without executing. Calling
    /// `stop` again is a no-op.
    pub fn stop(&self) {
        let mut thread_slot = self.thread.lock();
        let shared = &self.shared;

        match shared.state() {
            WorkerState::Stopped => return,
            WorkerState::Created => {
                shared.set_state(WorkerState::Stopped);
                self.discard_pending();
                return;
            }
            WorkerState::Running | WorkerState::StopRequested => {}
        }

        shared.set_state(WorkerState::StopRequested);
        let handle = thread_slot.take();

        // Poll and signal until acknowledged: the worker may be between its
        // exit check and going to sleep
        loop {
            {
                let _guard = shared.mutex.lock();
                shared.exit.store(true, Ordering::Release);
                shared.cond.notify_all();
            }
            if shared.exit_ack.load(Ordering::Acquire) {
                break;
            }
            if handle.as_ref().is_none_or(|h| h.is_finished()) {
                // A job took the thread down
                break;
            }
            thread::yield_now();
        }

        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!(worker = %shared.ctx.name, "worker thread panicked");
            }
        }

        shared.set_state(WorkerState::Stopped);
        self.discard_pending();
        info!(worker = %shared.ctx.name, "worker stopped");
    }

    /// Release jobs nothing will execute anymore
    fn discard_pending(&self) {
        let mut discarded = 0;
        while let Some(job) = self.shared.queue.pop(&epoch::pin()) {
            job.release();
            discarded += 1;
        }
        if discarded > 0 {
            warn!(worker = %self.shared.ctx.name, discarded, "released jobs left after stop");
        }
    }

    /// Link a job and wake the worker. Never fails, never blocks for long.
    ///
    /// Enqueueing onto a stopped worker is a caller bug: the job is released
    /// unexecuted when the worker is dropped.
    pub fn enqueue(&self, job: Job) {
        let shared = &self.shared;
        shared.queue.push(job, &epoch::pin());

        let capacity = shared.config.queue_capacity;
        if capacity > 0
            && shared.queue.len() > capacity
            && !shared.over_capacity.swap(true, Ordering::Relaxed)
        {
            warn!(
                worker = %shared.ctx.name,
                depth = shared.queue.len(),
                capacity,
                "queue above high-water mark"
            );
        }

        shared.signal();
    }

    /// Comparable load signal: queued jobs plus one while a job is executing
    pub fn load(&self) -> usize {
        self.shared.queue.len() + usize::from(self.shared.busy.load(Ordering::Relaxed))
    }

    /// Jobs linked but not yet dequeued
    pub fn depth(&self) -> usize {
        self.shared.queue.len()
    }

    /// Current lifecycle state
    pub fn state(&self) -> WorkerState {
        self.shared.state()
    }

    /// True between a successful `start` and `stop`
    pub fn is_running(&self) -> bool {
        self.shared.state() == WorkerState::Running
    }

    /// Worker identity
    pub fn context(&self) -> &WorkerContext {
        &self.shared.ctx
    }

    /// Thread name
    pub fn name(&self) -> &str {
        &self.shared.ctx.name
    }

    /// Snapshot of the worker counters
    pub fn stats(&self) -> WorkerStats {
        let shared = &self.shared;
        WorkerStats {
            index: shared.ctx.index,
            executed: shared.executed.load(Ordering::Acquire),
            peak_drain: shared.peak_drain.load(Ordering::Relaxed),
            sleeps: shared.sleeps.load(Ordering::Relaxed),
            depth: shared.queue.len(),
        }
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.shared.ctx.name)
            .field("state", &self.shared.state())
            .field("depth", &self.shared.queue.len())
            .finish()
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
        self.discard_pending();
    }
}
