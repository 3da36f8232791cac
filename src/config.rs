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

use crate::error::{Error, Result};
use crate::model_spec::ModelSpec;
use crate::queue::DEFAULT_QUEUE_SIZE;
use std::path::PathBuf;

/// Upper bound on the default worker count
const DEFAULT_WORKER_CAP: usize = 8;

/// Configuration for the granville server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path of the listening socket
    pub socket_path: PathBuf,

    /// Capacity of the ranked queue
    pub queue_size: usize,

    /// Worker thread count; `None` derives it from the pool size
    pub workers: Option<usize>,

    /// Name of the inference driver to instantiate
    pub driver: String,

    /// Models to load at startup
    pub models: Vec<ModelSpec>,
}

/// Platform default for the listening socket
pub fn default_socket_path() -> PathBuf {
    #[cfg(unix)]
    {
        PathBuf::from("/tmp/granville.sock")
    }
    #[cfg(windows)]
    {
        PathBuf::from(r"\\.\pipe\granville")
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            queue_size: DEFAULT_QUEUE_SIZE,
            workers: None,
            driver: "echo".to_string(),
            models: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Create a new configuration builder
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns a configuration error when any field is unusable.
    pub fn validate(&self) -> Result<()> {
        if self.models.is_empty() {
            return Err(Error::config("at least one model spec is required"));
        }

        if self.queue_size == 0 {
            return Err(Error::config("queue size must be greater than 0"));
        }

        if self.workers == Some(0) {
            return Err(Error::config("worker count must be greater than 0"));
        }

        if self.socket_path.as_os_str().is_empty() {
            return Err(Error::config("socket path cannot be empty"));
        }

        if self.driver.is_empty() {
            return Err(Error::config("driver name cannot be empty"));
        }

        Ok(())
    }

    /// Worker count to spawn for a pool of `num_models` models.
    ///
    /// Defaults to the pool size capped at 8; more workers than generation
    /// slots would only poll.
    pub fn effective_workers(&self, num_models: usize) -> usize {
        self.workers
            .unwrap_or_else(|| num_models.min(DEFAULT_WORKER_CAP).max(1))
    }
}

/// Builder for [`ServerConfig`]
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    socket_path: Option<PathBuf>,
    queue_size: Option<usize>,
    workers: Option<usize>,
    driver: Option<String>,
    models: Vec<ModelSpec>,
}

impl ServerConfigBuilder {
    /// Set the listening socket path
    pub fn socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = Some(path.into());
        self
    }

    /// Set the ranked queue capacity
    pub fn queue_size(mut self, size: usize) -> Self {
        self.queue_size = Some(size);
        self
    }

    /// Set the worker thread count
    pub fn worker_count(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Set the driver name
    pub fn driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = Some(driver.into());
        self
    }

    /// Add one model spec
    pub fn model_spec(mut self, spec: ModelSpec) -> Self {
        self.models.push(spec);
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    ///
    /// Returns the first validation error.
    pub fn build(self) -> Result<ServerConfig> {
        let config = ServerConfig {
            socket_path: self.socket_path.unwrap_or_else(default_socket_path),
            queue_size: self.queue_size.unwrap_or(DEFAULT_QUEUE_SIZE),
            workers: self.workers,
            driver: self.driver.unwrap_or_else(|| "echo".to_string()),
            models: self.models,
        };
        config.validate()?;
        Ok(config)
    }
}
