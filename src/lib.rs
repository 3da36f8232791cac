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

#![warn(missing_docs, clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::must_use_candidate)]

//! # Granville
//!
//! A local inference kernel: a long-running process that accepts
//! text-generation tasks from co-located clients over a local socket,
//! classifies them for urgency using the loaded model itself, routes them
//! across a pool of models with least-busy selection, and delivers results
//! asynchronously to a submitter-supplied callback endpoint.
//!
//! ## Architecture
//!
//! Submissions flow through two queues composed in series: a FIFO of
//! unclassified tasks feeding a single ranker thread, and a bounded
//! priority queue drained by a pool of symmetric worker threads. Submitters
//! get a synchronous ack and never block on inference.
//!
//! ## Example
//!
//! ```no_run
//! use granville::{backend, Server, ServerConfig};
//!
//! # fn main() -> granville::Result<()> {
//! let config = ServerConfig::builder()
//!     .socket_path("/tmp/granville.sock")
//!     .model_spec("inference:/models/tiny.gguf".parse()?)
//!     .build()?;
//!
//! let driver = backend::create("echo")?;
//! let server = Server::start(config, driver)?;
//! // ... submit tasks over the socket ...
//! server.shutdown();
//! # Ok(())
//! # }
//! ```

/// Driver abstraction over the external inference plugin
pub mod backend;

/// Server configuration
pub mod config;

/// Error handling module
pub mod error;

/// Model spec strings from the command line
pub mod model_spec;

/// Multi-model pool with least-busy selection
pub mod pool;

/// Task urgency levels
pub mod priority;

/// The two queueing disciplines
pub mod queue;

/// The ranking stage
pub mod ranker;

/// Listening socket, wire protocol, and callback delivery
pub mod server;

/// Task types carried through the pipeline
pub mod task;

/// Worker threads draining the ranked queue
pub mod worker;

// Re-export main types
pub use backend::{Backend, EchoBackend, LoadedModel};
pub use config::{ServerConfig, ServerConfigBuilder};
pub use error::{Error, Result, WireError};
pub use model_spec::{ModelKind, ModelSpec};
pub use pool::{ModelLease, ModelPool};
pub use priority::Priority;
pub use queue::{RankedQueue, UnrankedQueue, DEFAULT_QUEUE_SIZE};
pub use server::{run_server, Server};
pub use task::{RankedTask, UnrankedTask};
pub use worker::{WorkerPool, TOOL_ID_CHAT};

use std::sync::Once;
use std::time::Duration;
use tracing::{debug, info};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long an idle loop sleeps between queue polls
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Global initialization guard to ensure tracing is only initialized once
static INIT: Once = Once::new();

/// Initialize the library with default tracing subscriber
///
/// Sets up a global tracing subscriber so logging outlives every pipeline
/// thread. Call this once at the start of your application.
///
/// # Example
///
/// ```
/// granville::init();
/// ```
pub fn init() {
    init_with_env_filter("info");
}

/// Initialize the library with a custom environment filter
///
/// # Arguments
///
/// * `filter` - Environment filter string (e.g., "info", "debug", "granville=debug")
///
/// # Example
///
/// ```
/// granville::init_with_env_filter("granville=debug,info");
/// ```
pub fn init_with_env_filter(filter: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

        fmt().with_env_filter(env_filter).init();

        info!("Granville library initialized v{}", VERSION);
        debug!("Debug logging enabled");
    });
}
