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

//! Task types carried through the two-stage pipeline.
//!
//! All fields are owned: the connection handler moves decoded strings into
//! the task before acking, so nothing queued aliases a connection buffer.

use crate::priority::Priority;

/// A submission that has been accepted but not yet classified.
///
/// Created by the connection handler, consumed by the ranker (or pushed
/// straight to the ranked queue when the submitter opted out of ranking).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnrankedTask {
    /// Caller-supplied opaque task id; echoed in every frame about this task
    pub id: String,
    /// The text to classify and run inference on
    pub text: String,
    /// Endpoint the result or error frame is delivered to
    pub callback: String,
    /// Pin the task to a specific model; `None` routes least-busy
    pub model_id: Option<u32>,
    /// Generation budget for the inference call
    pub max_tokens: u32,
}

/// A task that has been classified and admitted to the ranked queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedTask {
    /// The underlying submission
    pub task: UnrankedTask,
    /// Urgency assigned by the ranker or the submitter
    pub priority: Priority,
    /// Position in arrival order, assigned at enqueue time under the
    /// queue lock; ties within a priority level pop in this order
    pub seq: u64,
}
