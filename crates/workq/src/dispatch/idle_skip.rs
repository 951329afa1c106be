//! Round-robin dispatch that steps around busy queues

use super::round_robin::RoundRobin;
use super::{DispatchPolicy, QueueLoads};

/// Rotation that prefers less-loaded queues.
///
/// The rotation proposes a candidate. An idle candidate is taken as is;
/// otherwise the least-loaded queue wins, searching from the candidate so
/// ties keep the rotation order. With equal loads everywhere this is plain
/// round-robin.
#[derive(Debug, Default)]
pub struct RoundRobinIdleSkip {
    rotation: RoundRobin,
}

impl RoundRobinIdleSkip {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DispatchPolicy for RoundRobinIdleSkip {
    fn name(&self) -> &'static str {
        "round-robin-idle-skip"
    }

    fn select(&self, queues: &dyn QueueLoads) -> usize {
        let len = queues.len();
        let candidate = self.rotation.advance(len);
        let mut best = (candidate, queues.load(candidate));
        if best.1 == 0 {
            return candidate;
        }

        for step in 1..len {
            let index = (candidate + step) % len;
            let load = queues.load(index);
            if load < best.1 {
                best = (index, load);
                if load == 0 {
                    break;
                }
            }
        }
        best.0
    }
}
