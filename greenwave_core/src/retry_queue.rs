//! Retry Queue - holds routed messages while no forwarding path exists.
//!
//! Drained once per tick. A message is re-attempted on every drain until
//! it is forwarded or its age exceeds the maximum wait, whichever comes
//! first. Expiry is a silent outcome: it is logged and counted, never
//! returned as an error.

use crate::messages::RoutedMessage;
use greenwave_env::NodeId;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

/// A routed message parked until connectivity returns.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub message: RoutedMessage,
    pub destination: NodeId,
    /// Neighbor the message came from, excluded as next hop on retry
    pub previous_hop: Option<NodeId>,
    pub enqueued_at: Duration,
}

impl QueuedMessage {
    pub fn age(&self, now: Duration) -> Duration {
        now.saturating_sub(self.enqueued_at)
    }
}

/// Result of one retry attempt, reported by the caller's closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAttempt {
    /// Transmitted; leaves the queue
    Sent,

    /// Still no path; stays queued
    Unreachable,

    /// Discarded for another reason (TTL exhausted, encode failure)
    Dropped,
}

/// Counts from one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub forwarded: usize,
    pub requeued: usize,
    pub expired: usize,
    pub dropped: usize,
}

/// FIFO of undeliverable messages bounded by age.
#[derive(Debug, Clone)]
pub struct RetryQueue {
    queue: VecDeque<QueuedMessage>,
    max_wait: Duration,
}

impl RetryQueue {
    pub fn new(max_wait: Duration) -> Self {
        Self {
            queue: VecDeque::new(),
            max_wait,
        }
    }

    pub fn enqueue(&mut self, message: QueuedMessage) {
        self.queue.push_back(message);
    }

    /// Re-attempts every queued message in arrival order.
    ///
    /// Messages older than the maximum wait are dropped before `attempt`
    /// sees them, so nothing is forwarded after `enqueued_at + max_wait`.
    /// Re-queued messages keep their original enqueue time.
    pub fn drain_and_retry<F>(&mut self, now: Duration, mut attempt: F) -> DrainReport
    where
        F: FnMut(&mut QueuedMessage) -> RetryAttempt,
    {
        let mut report = DrainReport::default();
        let pending = std::mem::take(&mut self.queue);

        for mut queued in pending {
            if queued.age(now) > self.max_wait {
                debug!(
                    "Dropping queued {} for {}: waited {:?}",
                    queued.message.kind(),
                    queued.destination,
                    queued.age(now)
                );
                report.expired += 1;
                continue;
            }

            match attempt(&mut queued) {
                RetryAttempt::Sent => report.forwarded += 1,
                RetryAttempt::Unreachable => {
                    self.queue.push_back(queued);
                    report.requeued += 1;
                }
                RetryAttempt::Dropped => report.dropped += 1,
            }
        }

        report
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedMessage> {
        self.queue.iter()
    }
}
