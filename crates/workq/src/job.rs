//! Jobs
//!
//! A job is a payload plus two callbacks: `execute` runs on the worker
//! thread, `release` runs right after it on the same thread. The job is moved
//! out of its queue node on dequeue, so only the node waits for the epoch
//! grace period.

use std::fmt;

use crate::worker::WorkerContext;

/// A unit of work
pub trait Task: Send + 'static {
    /// Run the job. Called exactly once, on the worker thread.
    fn execute(&mut self, ctx: &WorkerContext);

    /// Give back whatever backs the job. Called exactly once, after
    /// `execute` returns. Jobs discarded at shutdown are released by the
    /// thread stopping the worker without executing.
    fn release(self: Box<Self>) {}
}

/// Closure-built task
struct FnTask<P, E, R> {
    payload: P,
    execute: Option<E>,
    release: R,
}

impl<P, E, R> Task for FnTask<P, E, R>
where
    P: Send + 'static,
    E: FnOnce(&mut P, &WorkerContext) + Send + 'static,
    R: FnOnce(P) + Send + 'static,
{
    fn execute(&mut self, ctx: &WorkerContext) {
        if let Some(execute) = self.execute.take() {
            execute(&mut self.payload, ctx);
        }
    }

    fn release(self: Box<Self>) {
        let this = *self;
        (this.release)(this.payload);
    }
}

/// A job as carried by the queues
pub struct Job {
    task: Box<dyn Task>,
}

impl Job {
    /// Job over `payload`; the payload is dropped on release.
    ///
    /// With a [`Slice`](workq_mempool::Slice) payload, dropping it is what
    /// returns the memory to its pool.
    pub fn new<P, E>(payload: P, execute: E) -> Self
    where
        P: Send + 'static,
        E: FnOnce(&mut P, &WorkerContext) + Send + 'static,
    {
        Self::with_release(payload, execute, drop)
    }

    /// Job over `payload` with an explicit release callback
    pub fn with_release<P, E, R>(payload: P, execute: E, release: R) -> Self
    where
        P: Send + 'static,
        E: FnOnce(&mut P, &WorkerContext) + Send + 'static,
        R: FnOnce(P) + Send + 'static,
    {
        Self::from_task(FnTask {
            payload,
            execute: Some(execute),
            release,
        })
    }

    /// Job from a bare closure
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnOnce(&WorkerContext) + Send + 'static,
    {
        Self::new((), move |_: &mut (), ctx: &WorkerContext| f(ctx))
    }

    /// Job from a [`Task`] implementation
    pub fn from_task<T: Task>(task: T) -> Self {
        Self {
            task: Box::new(task),
        }
    }

    pub(crate) fn execute(&mut self, ctx: &WorkerContext) {
        self.task.execute(ctx);
    }

    pub(crate) fn release(self) {
        self.task.release();
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counted {
        executed: Arc<AtomicUsize>,
        released: Arc<AtomicUsize>,
    }

    impl Task for Counted {
        fn execute(&mut self, _ctx: &WorkerContext) {
            self.executed.fetch_add(1, Ordering::SeqCst);
        }

        fn release(self: Box<Self>) {
            assert_eq!(self.executed.load(Ordering::SeqCst), 1);
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_task_lifecycle() {
        let executed = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicUsize::new(0));
        let mut job = Job::from_task(Counted {
            executed: Arc::clone(&executed),
            released: Arc::clone(&released),
        });

        let ctx = WorkerContext::detached(0);
        job.execute(&ctx);
        job.release();

        assert_eq!(executed.load(Ordering::SeqCst), 1);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_payload_reaches_release() {
        let out = Arc::new(AtomicUsize::new(0));
        let out_in = Arc::clone(&out);
        let mut job = Job::with_release(
            10usize,
            |n: &mut usize, _: &WorkerContext| *n *= 3,
            move |n| out_in.store(n, Ordering::SeqCst),
        );

        job.execute(&WorkerContext::detached(0));
        job.release();
        assert_eq!(out.load(Ordering::SeqCst), 30);
    }

    #[test]
    fn test_release_without_execute() {
        let dropped = Arc::new(());
        let job = Job::new(Arc::clone(&dropped), |_: &mut Arc<()>, _: &WorkerContext| {
            panic!("must not run")
        });
        job.release();
        assert_eq!(Arc::strong_count(&dropped), 1);
    }
}
