use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::hit::HitData;

/// What the producer does when the queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued hit
    DropOldest,
    /// Wait up to `timeout_ms` for the consumer to make room, then evict the oldest hit
    Block { timeout_ms: u64 },
}

/// Lifetime counters of a queue. `pushed == popped + dropped + queued` always holds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounters {
    pub pushed: u64,
    pub popped: u64,
    pub dropped: u64,
    pub queued: usize,
}

#[derive(Debug, Default)]
struct QueueState {
    hits: VecDeque<HitData>,
    bytes: usize,
    pushed: u64,
    popped: u64,
    dropped: u64,
}

impl QueueState {
    fn evict_oldest(&mut self) {
        if let Some(hit) = self.hits.pop_front() {
            self.bytes -= hit.size_bytes();
            self.dropped += 1;
        }
    }
}

/// HitQueue stages hits between the producer and the consumer.
///
/// Hits keep producer order. The lock is only held to append or drain; the consumer takes
/// every queued hit at once with [`HitQueue::try_pop_all`] and processes them unlocked.
#[derive(Debug)]
pub struct HitQueue {
    state: Mutex<QueueState>,
    space: Condvar,
    capacity: usize,
    policy: OverflowPolicy,
}

impl HitQueue {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            space: Condvar::new(),
            capacity: capacity.max(1),
            policy,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append hits in order. Returns the number of hits dropped to make room
    pub fn push(&self, hits: Vec<HitData>) -> u64 {
        let mut state = self.state.lock();
        let dropped_before = state.dropped;
        for hit in hits {
            if state.hits.len() >= self.capacity {
                if let OverflowPolicy::Block { timeout_ms } = self.policy {
                    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
                    while state.hits.len() >= self.capacity {
                        if self.space.wait_until(&mut state, deadline).timed_out() {
                            break;
                        }
                    }
                }
                if state.hits.len() >= self.capacity {
                    state.evict_oldest();
                }
            }
            state.bytes += hit.size_bytes();
            state.hits.push_back(hit);
            state.pushed += 1;
        }
        state.dropped - dropped_before
    }

    /// Remove and return every queued hit, oldest first
    pub fn try_pop_all(&self) -> Vec<HitData> {
        let mut state = self.state.lock();
        if state.hits.is_empty() {
            return Vec::new();
        }
        let hits: Vec<HitData> = std::mem::take(&mut state.hits).into();
        state.popped += hits.len() as u64;
        state.bytes = 0;
        drop(state);
        self.space.notify_all();
        hits
    }

    pub fn len(&self) -> usize {
        self.state.lock().hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().hits.is_empty()
    }

    /// Approximate memory held by the queued hits
    pub fn queued_bytes(&self) -> usize {
        self.state.lock().bytes
    }

    pub fn counters(&self) -> QueueCounters {
        let state = self.state.lock();
        QueueCounters {
            pushed: state.pushed,
            popped: state.popped,
            dropped: state.dropped,
            queued: state.hits.len(),
        }
    }
}
