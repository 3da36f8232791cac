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

//! The ranking stage: a single thread that classifies submissions.
//!
//! Classification is itself an inference call against the pool, which is
//! why it runs on its own stage between the two queues: a burst of
//! unclassified work cannot starve dispatch, and a classification failure
//! cannot poison the priority ordering. Ranking is best-effort; a task
//! whose classification fails proceeds at normal priority rather than
//! being dropped.

use crate::pool::ModelPool;
use crate::priority::Priority;
use crate::queue::{RankedQueue, UnrankedQueue};
use crate::server::callback;
use crate::server::wire::ErrorFrame;
use crate::task::UnrankedTask;
use crate::POLL_INTERVAL;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

/// Generation budget for a classification call. The reply only needs the
/// `PRIORITY:` line, but short budgets truncate the token on some drivers.
pub(crate) const RANK_MAX_TOKENS: u32 = 32;

/// How far into the reply the priority token is searched for
const PRIORITY_SCAN_BYTES: usize = 64;

/// Instruction prepended to the task payload. The first
/// `PRIORITY_SCAN_BYTES` bytes must not contain any priority token, so a
/// driver that echoes its prompt classifies as normal.
const CLASSIFY_PREAMBLE: &str = "You rank incoming tasks and redact personal data.\n\
Reply with exactly two lines:\n\
PRIORITY: one of CRITICAL, HIGH, NORMAL, or LOW\n\
REDACTED: the task text with personal data replaced by [EMAIL], [PHONE], [SSN], [NAME], [ADDRESS], or [CARD]\n\
\n\
Task: ";

/// The ranker loop: consumes the unranked queue, classifies via the pool,
/// and admits tasks to the ranked queue.
pub struct Ranker {
    unranked: Arc<UnrankedQueue>,
    ranked: Arc<RankedQueue>,
    pool: Arc<ModelPool>,
    running: Arc<AtomicBool>,
}

impl Ranker {
    /// Spawn the ranker in a dedicated thread.
    pub fn spawn(
        unranked: Arc<UnrankedQueue>,
        ranked: Arc<RankedQueue>,
        pool: Arc<ModelPool>,
        running: Arc<AtomicBool>,
    ) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            let ranker = Ranker {
                unranked,
                ranked,
                pool,
                running,
            };
            ranker.run();
        })
    }

    fn run(&self) {
        info!("ranker starting");
        while self.running.load(Ordering::Relaxed) {
            match self.unranked.pop() {
                Some(task) => self.rank(task),
                None => thread::sleep(POLL_INTERVAL),
            }
        }
        info!("ranker shutting down");
    }

    fn rank(&self, task: UnrankedTask) {
        let priority = self.classify(&task.text);
        debug!("task {} ranked {}", task.id, priority);

        // kept for the error frame if admission fails after the move
        let id = task.id.clone();
        let endpoint = task.callback.clone();

        if let Err(err) = self.ranked.push(task, priority) {
            warn!("admission failed for ranked task {id}: {err}");
            let frame = ErrorFrame::new(&id, &err.wire_error());
            if let Err(err) = callback::deliver(&endpoint, &frame) {
                warn!("error frame for task {id} dropped: {err}");
            }
        }
    }

    fn classify(&self, text: &str) -> Priority {
        let Some(lease) = self.pool.acquire_least_busy(None) else {
            warn!("no model available for ranking; defaulting to normal");
            return Priority::Normal;
        };
        let prompt = format!("{CLASSIFY_PREAMBLE}{text}");
        match lease.generate(&prompt, RANK_MAX_TOKENS) {
            Ok(reply) => parse_priority(&reply),
            Err(err) => {
                warn!("ranking inference failed: {err}; defaulting to normal");
                Priority::Normal
            }
        }
    }
}

/// Extract the priority token from a classification reply.
///
/// Folds the head of the reply to uppercase and searches for CRITICAL,
/// HIGH, then LOW; the first match wins and anything else is normal. The
/// scan is byte-wise, so multi-byte input cannot split the fold.
pub(crate) fn parse_priority(reply: &str) -> Priority {
    let head = &reply.as_bytes()[..reply.len().min(PRIORITY_SCAN_BYTES)];
    let folded = head.to_ascii_uppercase();
    for (needle, priority) in [
        (&b"CRITICAL"[..], Priority::Critical),
        (&b"HIGH"[..], Priority::High),
        (&b"LOW"[..], Priority::Low),
    ] {
        if folded.windows(needle.len()).any(|window| window == needle) {
            return priority;
        }
    }
    Priority::Normal
}
