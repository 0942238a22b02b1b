//! Deferred-task scheduler.
//!
//! A min-heap of tasks keyed by the simulated time they are due. Tasks with
//! the same run time come out in the order they were scheduled, so draining
//! is deterministic no matter how many work items are outstanding.

use crate::pipeline::id::{StageId, TokenId};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A deferred completion owned by one stage.
///
/// The action is resolved by handing `work` back to `stage` when the task
/// is drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledTask {
    pub run_at: u64,
    pub stage: StageId,
    pub work: TokenId,
    seq: u64,
}

impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for a min-heap: earliest run time first, then FIFO.
        other
            .run_at
            .cmp(&self.run_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Pending deferred tasks ordered by run time.
#[derive(Debug, Default)]
pub struct Scheduler {
    heap: BinaryHeap<ScheduledTask>,
    next_seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Record a task due at `run_at`. Callers check `run_at >= now`.
    pub fn schedule_at(&mut self, run_at: u64, stage: StageId, work: TokenId) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(ScheduledTask {
            run_at,
            stage,
            work,
            seq,
        });
    }

    /// Remove and return the earliest pending task.
    pub fn pop_next(&mut self) -> Option<ScheduledTask> {
        self.heap.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn earliest_first() {
        let mut sched = Scheduler::new();
        sched.schedule_at(300, StageId(0), TokenId(1));
        sched.schedule_at(100, StageId(0), TokenId(2));
        sched.schedule_at(200, StageId(0), TokenId(3));

        let order: Vec<_> = std::iter::from_fn(|| sched.pop_next())
            .map(|t| t.work)
            .collect();
        assert_eq!(order, vec![TokenId(2), TokenId(3), TokenId(1)]);
    }

    #[test]
    fn ties_are_fifo() {
        let mut sched = Scheduler::new();
        for n in 0..5 {
            sched.schedule_at(50, StageId(0), TokenId(n));
        }
        let order: Vec<_> = std::iter::from_fn(|| sched.pop_next())
            .map(|t| t.work.0)
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        assert!(sched.is_empty());
    }
}
