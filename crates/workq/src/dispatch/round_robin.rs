//! Round-robin dispatch

use std::sync::atomic::{AtomicUsize, Ordering};

use super::{DispatchPolicy, QueueLoads};

/// Hands queues out in strict rotation.
///
/// Balanced only when jobs cost about the same; a run of slow jobs on one
/// queue does not move traffic elsewhere.
#[derive(Debug, Default)]
pub struct RoundRobin {
    next: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the rotation over `len` queues and return the slot taken
    pub(crate) fn advance(&self, len: usize) -> usize {
        // fetch_update only fails when the closure returns None
        match self
            .next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |i| Some((i + 1) % len))
        {
            Ok(prev) | Err(prev) => prev % len,
        }
    }
}

impl DispatchPolicy for RoundRobin {
    fn name(&self) -> &'static str {
        "round-robin"
    }

    fn select(&self, queues: &dyn QueueLoads) -> usize {
        self.advance(queues.len())
    }
}
