// Copyright 2025 Granville Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The two queueing disciplines composed in series.
//!
//! [`UnrankedQueue`] is an unbounded FIFO of submissions awaiting
//! classification. [`RankedQueue`] is the bounded priority stage workers
//! drain; it orders by priority first and arrival second, and it is the
//! only admission limit, keeping classification backpressure separate
//! from dispatch backpressure.

use crate::error::{Error, Result};
use crate::priority::Priority;
use crate::task::{RankedTask, UnrankedTask};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

/// Default capacity of the ranked queue
pub const DEFAULT_QUEUE_SIZE: usize = 1000;

/// Thread-safe FIFO of tasks awaiting classification.
#[derive(Default)]
pub struct UnrankedQueue {
    inner: Mutex<VecDeque<UnrankedTask>>,
}

impl UnrankedQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task.
    pub fn push(&self, task: UnrankedTask) {
        self.inner.lock().push_back(task);
    }

    /// Remove and return the oldest task.
    pub fn pop(&self) -> Option<UnrankedTask> {
        self.inner.lock().pop_front()
    }

    /// Number of queued tasks
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// True when nothing is queued
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Heap entry; ordering is inverted so the max-heap surfaces the
/// strongest-priority, earliest-arrival task.
struct QueuedTask(RankedTask);

impl QueuedTask {
    fn key(&self) -> (Priority, u64) {
        (self.0.priority, self.0.seq)
    }
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

struct RankedInner {
    heap: BinaryHeap<QueuedTask>,
    next_seq: u64,
}

/// Thread-safe priority queue of classified tasks.
pub struct RankedQueue {
    inner: Mutex<RankedInner>,
    max_size: usize,
}

impl RankedQueue {
    /// Create a queue bounded at `max_size` entries.
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(RankedInner {
                heap: BinaryHeap::new(),
                next_seq: 0,
            }),
            max_size,
        }
    }

    /// Admit a task at the given priority.
    ///
    /// The arrival sequence is assigned here, under the lock; a task that
    /// ranks quickly can therefore overtake one submitted earlier but
    /// still ranking.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueFull`] at capacity, without mutating the
    /// queue.
    pub fn push(&self, task: UnrankedTask, priority: Priority) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.heap.len() >= self.max_size {
            return Err(Error::QueueFull {
                capacity: self.max_size,
            });
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(QueuedTask(RankedTask {
            task,
            priority,
            seq,
        }));
        Ok(())
    }

    /// Remove and return the strongest-priority, earliest-arrival task.
    ///
    /// Never blocks; `None` means the queue is empty right now.
    pub fn pop_best(&self) -> Option<RankedTask> {
        self.inner.lock().heap.pop().map(|entry| entry.0)
    }

    /// Number of queued tasks
    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    /// True when nothing is queued
    pub fn is_empty(&self) -> bool {
        self.inner.lock().heap.is_empty()
    }

    /// Configured capacity
    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

impl Default for RankedQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_SIZE)
    }
}
