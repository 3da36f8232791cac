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

//! Driver abstraction over the external inference plugin.
//!
//! The real inference implementation lives behind [`Backend`]: a driver
//! loads a model file and hands back a [`LoadedModel`] whose `generate`
//! produces owned text. Unloading is the model's `Drop`; string ownership
//! replaces the C-level free call the plugin table exposes. Keeping the
//! trait object-safe lets heavyweight drivers stay in external crates.
//!
//! Inputs crossing the driver boundary are bounded: paths and prompts that
//! exceed the fixed limits are rejected before the driver sees them.

use crate::error::{Error, Result};
use std::path::Path;
use std::sync::Arc;

/// Longest model path accepted by a driver, in bytes
pub const MAX_MODEL_PATH_BYTES: usize = 4096;

/// Longest prompt accepted by a driver, in bytes
pub const MAX_PROMPT_BYTES: usize = 64 * 1024;

/// A pluggable inference driver.
///
/// Implementations must be safe to call from multiple threads; `generate`
/// may run concurrently on *different* loaded models. Concurrency on the
/// same model is approximated by the pool's busy accounting rather than
/// enforced here.
pub trait Backend: Send + Sync + std::fmt::Debug {
    /// Human-readable driver name
    fn name(&self) -> &str;

    /// Driver version string
    fn version(&self) -> &str;

    /// Load a model file and return a handle to it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ModelLoadFailed`] when the file cannot be loaded.
    fn load(&self, path: &Path) -> Result<Arc<dyn LoadedModel>>;
}

/// One loaded model held by the pool.
///
/// Dropping the last reference releases the underlying driver resources.
pub trait LoadedModel: Send + Sync + std::fmt::Debug {
    /// Generate text from a prompt with a bounded token budget.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GenerationFailed`] when inference fails.
    fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String>;
}

/// Driver names this build can instantiate
pub fn available() -> &'static [&'static str] {
    &["echo"]
}

/// Instantiate a driver by name.
///
/// # Errors
///
/// Returns [`Error::DriverNotFound`] for names not in [`available`].
pub fn create(name: &str) -> Result<Box<dyn Backend>> {
    match name {
        "echo" => Ok(Box::new(EchoBackend)),
        _ => Err(Error::DriverNotFound {
            name: name.to_string(),
        }),
    }
}

/// Built-in driver that echoes the prompt back.
///
/// Useful for pipeline smoke tests and local development without real
/// model dependencies. `max_tokens` is approximated as a whitespace word
/// budget.
#[derive(Debug, Default)]
pub struct EchoBackend;

impl Backend for EchoBackend {
    fn name(&self) -> &str {
        "echo"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn load(&self, path: &Path) -> Result<Arc<dyn LoadedModel>> {
        if !path.exists() {
            return Err(Error::ModelLoadFailed {
                path: path.to_path_buf(),
                source: anyhow::anyhow!("file not found"),
            });
        }
        Ok(Arc::new(EchoModel))
    }
}

#[derive(Debug)]
struct EchoModel;

impl LoadedModel for EchoModel {
    fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let budget = max_tokens as usize;
        if prompt.split_whitespace().count() <= budget {
            return Ok(prompt.to_string());
        }
        Ok(prompt
            .split_whitespace()
            .take(budget)
            .collect::<Vec<_>>()
            .join(" "))
    }
}
