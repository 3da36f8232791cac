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

//! Multi-model pool with least-busy selection.
//!
//! One mutex guards the entry list and every per-model busy counter.
//! Selection and the busy-count increment happen under the same lock
//! acquisition; two workers can never claim the same "least busy" slot.
//! Releasing is the lease's `Drop`, so every exit path gives the model
//! back.

use crate::backend::{Backend, LoadedModel, MAX_MODEL_PATH_BYTES, MAX_PROMPT_BYTES};
use crate::error::{Error, Result};
use crate::model_spec::{ModelKind, ModelSpec};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug)]
struct ModelEntry {
    id: u32,
    kind: ModelKind,
    path: String,
    model: Arc<dyn LoadedModel>,
    active_requests: u32,
}

#[derive(Debug)]
struct PoolInner {
    models: Vec<ModelEntry>,
    next_auto_id: u32,
}

/// The set of loaded models inside one process.
#[derive(Debug)]
pub struct ModelPool {
    backend: Box<dyn Backend>,
    inner: Mutex<PoolInner>,
}

impl ModelPool {
    /// Create an empty pool backed by the given driver.
    pub fn new(backend: Box<dyn Backend>) -> Self {
        info!(
            "model pool using driver {} v{}",
            backend.name(),
            backend.version()
        );
        Self {
            backend,
            inner: Mutex::new(PoolInner {
                models: Vec::new(),
                next_auto_id: 1,
            }),
        }
    }

    /// Name of the driver backing this pool
    pub fn driver_name(&self) -> &str {
        self.backend.name()
    }

    /// Load a model and append it to the pool.
    ///
    /// Ids are auto-assigned 1, 2, 3 unless the spec pins one; a pinned id
    /// advances the auto counter past itself so later assignments stay
    /// unique. A failed load leaves the pool unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PathTooLong`] for oversized paths,
    /// [`Error::ModelLoadFailed`] from the driver, and a configuration
    /// error for duplicate explicit ids.
    pub fn load(&self, spec: &ModelSpec) -> Result<u32> {
        if spec.path.len() > MAX_MODEL_PATH_BYTES {
            return Err(Error::PathTooLong {
                len: spec.path.len(),
                max: MAX_MODEL_PATH_BYTES,
            });
        }

        // the driver call can be slow; keep it outside the pool lock
        let model = self.backend.load(Path::new(&spec.path))?;

        let mut inner = self.inner.lock();
        let id = match spec.id {
            Some(id) => {
                if inner.models.iter().any(|m| m.id == id) {
                    return Err(Error::config(format!("duplicate model id {id}")));
                }
                if id >= inner.next_auto_id {
                    inner.next_auto_id = id + 1;
                }
                id
            }
            None => {
                let id = inner.next_auto_id;
                inner.next_auto_id += 1;
                id
            }
        };
        inner.models.push(ModelEntry {
            id,
            kind: spec.kind,
            path: spec.path.clone(),
            model,
            active_requests: 0,
        });
        info!("loaded model {} ({}) from {}", id, spec.kind.as_str(), spec.path);
        Ok(id)
    }

    /// Number of loaded models
    pub fn len(&self) -> usize {
        self.inner.lock().models.len()
    }

    /// True when no models are loaded
    pub fn is_empty(&self) -> bool {
        self.inner.lock().models.is_empty()
    }

    /// Ids of every loaded model, in insertion order
    pub fn model_ids(&self) -> Vec<u32> {
        self.inner.lock().models.iter().map(|m| m.id).collect()
    }

    /// In-flight request count for a model, if it exists
    pub fn active_requests(&self, id: u32) -> Option<u32> {
        self.inner
            .lock()
            .models
            .iter()
            .find(|m| m.id == id)
            .map(|m| m.active_requests)
    }

    /// Claim the loaded model with the fewest in-flight requests.
    ///
    /// A type filter restricts the scan, with `Unassigned` entries matching
    /// any filter. Ties break toward the earliest-loaded entry. Returns
    /// `None` on an empty pool or when nothing matches the filter.
    pub fn acquire_least_busy(&self, filter: Option<ModelKind>) -> Option<ModelLease<'_>> {
        let mut inner = self.inner.lock();
        let mut best: Option<(usize, u32)> = None;
        for (idx, entry) in inner.models.iter().enumerate() {
            if let Some(kind) = filter {
                if entry.kind != kind && entry.kind != ModelKind::Unassigned {
                    continue;
                }
            }
            match best {
                Some((_, busy)) if entry.active_requests >= busy => {}
                _ => best = Some((idx, entry.active_requests)),
            }
        }
        let (idx, _) = best?;
        let entry = &mut inner.models[idx];
        entry.active_requests += 1;
        debug!(
            "acquired model {} ({} in flight)",
            entry.id, entry.active_requests
        );
        Some(ModelLease {
            pool: self,
            id: entry.id,
            model: Arc::clone(&entry.model),
        })
    }

    /// Claim a specific model by id; `None` when it is not in the pool.
    pub fn acquire_by_id(&self, id: u32) -> Option<ModelLease<'_>> {
        let mut inner = self.inner.lock();
        let entry = inner.models.iter_mut().find(|m| m.id == id)?;
        entry.active_requests += 1;
        Some(ModelLease {
            pool: self,
            id: entry.id,
            model: Arc::clone(&entry.model),
        })
    }

    /// Declared path of a model, if it exists
    pub fn model_path(&self, id: u32) -> Option<String> {
        self.inner
            .lock()
            .models
            .iter()
            .find(|m| m.id == id)
            .map(|m| m.path.clone())
    }

    fn release(&self, id: u32) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.models.iter_mut().find(|m| m.id == id) {
            entry.active_requests = entry.active_requests.saturating_sub(1);
            debug!(
                "released model {} ({} in flight)",
                entry.id, entry.active_requests
            );
        }
    }
}

/// A claimed model; the busy count stays raised until this is dropped.
pub struct ModelLease<'a> {
    pool: &'a ModelPool,
    id: u32,
    model: Arc<dyn LoadedModel>,
}

impl ModelLease<'_> {
    /// Pool id of the claimed model
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Run generation on the claimed model.
    ///
    /// The pool lock is not held across this call; only the lease keeps the
    /// model marked busy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PromptTooLong`] for oversized prompts and the
    /// driver's error otherwise.
    pub fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        if prompt.len() > MAX_PROMPT_BYTES {
            return Err(Error::PromptTooLong {
                len: prompt.len(),
                max: MAX_PROMPT_BYTES,
            });
        }
        self.model.generate(prompt, max_tokens)
    }
}

impl Drop for ModelLease<'_> {
    fn drop(&mut self) {
        self.pool.release(self.id);
    }
}
