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

//! Worker threads draining the ranked queue.
//!
//! Workers are symmetric: none is bound to a model. Each cycle pops the
//! strongest-priority task, claims a model (pinned by the task or
//! least-busy), generates, and delivers the result or error to the task's
//! callback endpoint. The model lease drops before delivery, so the busy
//! count reflects only in-flight generation.

use crate::pool::ModelPool;
use crate::priority::Priority;
use crate::queue::RankedQueue;
use crate::server::callback;
use crate::server::wire::{ErrorFrame, ResultFrame};
use crate::task::{RankedTask, UnrankedTask};
use crate::POLL_INTERVAL;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{error, info, warn};

/// Tool id carried on plain chat results
pub const TOOL_ID_CHAT: &str = "__chat__";

/// Longest generated text carried in a result frame; longer replies are
/// truncated at a character boundary rather than failed.
pub(crate) const MAX_RESPONSE_BYTES: usize = 32 * 1024;

/// Handles to the spawned worker threads.
#[derive(Debug)]
pub struct WorkerPool {
    handles: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` workers over the shared queue and pool.
    pub fn spawn(
        count: usize,
        ranked: Arc<RankedQueue>,
        pool: Arc<ModelPool>,
        running: Arc<AtomicBool>,
    ) -> Self {
        info!("spawning {count} workers");
        let handles = (0..count)
            .map(|id| {
                let worker = Worker {
                    id,
                    ranked: Arc::clone(&ranked),
                    pool: Arc::clone(&pool),
                    running: Arc::clone(&running),
                };
                thread::spawn(move || worker.run())
            })
            .collect();
        Self { handles }
    }

    /// Number of workers spawned
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// True when no workers were spawned
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to exit. Workers finish their current task
    /// and leave at the next loop head once the running flag clears.
    pub fn join(self) {
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

struct Worker {
    id: usize,
    ranked: Arc<RankedQueue>,
    pool: Arc<ModelPool>,
    running: Arc<AtomicBool>,
}

impl Worker {
    fn run(&self) {
        info!("worker {} starting", self.id);
        while self.running.load(Ordering::Relaxed) {
            match self.ranked.pop_best() {
                Some(task) => self.handle(task),
                None => thread::sleep(POLL_INTERVAL),
            }
        }
        info!("worker {} shutting down", self.id);
    }

    fn handle(&self, ranked: RankedTask) {
        let RankedTask { task, priority, .. } = ranked;

        let lease = match task.model_id {
            Some(id) => self.pool.acquire_by_id(id),
            None => self.pool.acquire_least_busy(None),
        };
        let Some(lease) = lease else {
            warn!("no model available for task {}", task.id);
            self.fail(&task, &crate::error::WireError::InternalError);
            return;
        };

        let model_id = lease.id();
        let outcome = lease.generate(&task.text, task.max_tokens);
        drop(lease);

        match outcome {
            Ok(reply) => self.complete(&task, model_id, priority, reply),
            Err(err) => {
                error!("inference failed for task {}: {err}", task.id);
                self.fail(&task, &err.wire_error());
            }
        }
    }

    fn complete(&self, task: &UnrankedTask, model_id: u32, priority: Priority, mut reply: String) {
        if reply.len() > MAX_RESPONSE_BYTES {
            warn!(
                "reply for task {} truncated from {} bytes",
                task.id,
                reply.len()
            );
            truncate_utf8(&mut reply, MAX_RESPONSE_BYTES);
        }

        // serde_json handles quote and backslash escaping in the reply
        let tool_input_json = match serde_json::to_string(&[reply.as_str()]) {
            Ok(json) => json,
            Err(err) => {
                error!("result framing failed for task {}: {err}", task.id);
                self.fail(task, &crate::error::WireError::InternalError);
                return;
            }
        };

        let frame = ResultFrame {
            id: task.id.clone(),
            model_id,
            tool_id: TOOL_ID_CHAT.to_string(),
            tool_input_json,
            priority: priority.as_str().to_string(),
        };
        if let Err(err) = callback::deliver(&task.callback, &frame) {
            warn!("result for task {} dropped: {err}", task.id);
        }
    }

    fn fail(&self, task: &UnrankedTask, error: &crate::error::WireError) {
        let frame = ErrorFrame::new(&task.id, error);
        if let Err(err) = callback::deliver(&task.callback, &frame) {
            warn!("error frame for task {} dropped: {err}", task.id);
        }
    }
}

/// Truncate a string to at most `max` bytes without splitting a character.
fn truncate_utf8(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}
