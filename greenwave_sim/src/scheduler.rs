//! Discrete-event queue driving every node's `on_tick()`.
//!
//! Events come out in non-decreasing time order. Events for the same
//! instant come out in the order they were scheduled.

use greenwave_env::NodeId;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Duration;

/// A node asking to be woken at `at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wakeup {
    pub at: Duration,
    pub node: NodeId,
}

#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Reverse<(Duration, u64, NodeId)>>,
    seq: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, at: Duration, node: NodeId) {
        self.heap.push(Reverse((at, self.seq, node)));
        self.seq += 1;
    }

    pub fn pop(&mut self) -> Option<Wakeup> {
        self.heap.pop().map(|Reverse((at, _, node))| Wakeup { at, node })
    }

    /// Time of the next event, if any.
    pub fn peek_time(&self) -> Option<Duration> {
        self.heap.peek().map(|Reverse((at, _, _))| *at)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
