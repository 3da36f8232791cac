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

//! The listening side of the kernel.
//!
//! One request envelope per connection: read, validate, ack, enqueue,
//! close. Results never travel on the inbound connection; they go out
//! through [`callback`] to the endpoint the submitter named. Per-connection
//! errors are logged and never tear down the accept loop.

pub mod callback;
pub mod wire;

use crate::backend::{self, Backend};
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::pool::ModelPool;
use crate::priority::Priority;
use crate::queue::{RankedQueue, UnrankedQueue};
use crate::ranker::Ranker;
use crate::task::UnrankedTask;
use crate::worker::WorkerPool;
use std::fs;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long a connected submitter may dawdle before the handler gives up
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

struct Shared {
    unranked: Arc<UnrankedQueue>,
    ranked: Arc<RankedQueue>,
}

/// A running granville server.
///
/// Owns the accept loop, the ranker, and the worker pool. Dropping the
/// handle without calling [`Server::shutdown`] leaves the threads running
/// for the life of the process.
#[derive(Debug)]
pub struct Server {
    running: Arc<AtomicBool>,
    socket_path: PathBuf,
    pool: Arc<ModelPool>,
    accept_handle: Option<thread::JoinHandle<()>>,
    ranker_handle: Option<thread::JoinHandle<()>>,
    workers: Option<WorkerPool>,
}

impl Server {
    /// Load every configured model, bind the socket, and start all threads.
    ///
    /// # Errors
    ///
    /// Returns the first startup failure: invalid configuration, a model
    /// that will not load, or a socket that will not bind. Models loaded
    /// before the failure are released on drop.
    pub fn start(config: ServerConfig, backend: Box<dyn Backend>) -> Result<Server> {
        config.validate()?;

        let pool = Arc::new(ModelPool::new(backend));
        for spec in &config.models {
            pool.load(spec)?;
        }

        let listener = bind_socket(&config.socket_path)?;
        info!("listening on {}", config.socket_path.display());

        let unranked = Arc::new(UnrankedQueue::new());
        let ranked = Arc::new(RankedQueue::new(config.queue_size));
        let running = Arc::new(AtomicBool::new(true));

        let ranker_handle = Ranker::spawn(
            Arc::clone(&unranked),
            Arc::clone(&ranked),
            Arc::clone(&pool),
            Arc::clone(&running),
        );
        let workers = WorkerPool::spawn(
            config.effective_workers(pool.len()),
            Arc::clone(&ranked),
            Arc::clone(&pool),
            Arc::clone(&running),
        );

        let accept_handle = {
            let running = Arc::clone(&running);
            let shared = Shared { unranked, ranked };
            thread::spawn(move || accept_loop(&listener, &running, &shared))
        };

        Ok(Server {
            running,
            socket_path: config.socket_path,
            pool,
            accept_handle: Some(accept_handle),
            ranker_handle: Some(ranker_handle),
            workers: Some(workers),
        })
    }

    /// Path of the listening socket
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// The model pool behind this server
    pub fn pool(&self) -> &Arc<ModelPool> {
        &self.pool
    }

    /// Block until the accept loop exits.
    pub fn join(mut self) {
        if let Some(handle) = self.accept_handle.take() {
            let _ = handle.join();
        }
        self.stop_threads();
    }

    /// Stop accepting, let every thread finish its current task, and
    /// remove the socket file.
    pub fn shutdown(mut self) {
        info!("shutting down");
        self.running.store(false, Ordering::Relaxed);
        // a no-op connection unblocks the accept call
        let _ = UnixStream::connect(&self.socket_path);
        if let Some(handle) = self.accept_handle.take() {
            let _ = handle.join();
        }
        self.stop_threads();
        let _ = fs::remove_file(&self.socket_path);
        info!("stopped");
    }

    fn stop_threads(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.ranker_handle.take() {
            let _ = handle.join();
        }
        if let Some(workers) = self.workers.take() {
            workers.join();
        }
    }
}

/// Start a server with the configured driver and block forever.
///
/// # Errors
///
/// Returns startup failures; see [`Server::start`].
pub fn run_server(config: ServerConfig) -> Result<()> {
    let backend = backend::create(&config.driver)?;
    let server = Server::start(config, backend)?;
    server.join();
    Ok(())
}

fn bind_socket(path: &Path) -> Result<UnixListener> {
    // a stale socket file from an unclean exit would fail the bind
    if path.exists() {
        debug!("removing stale socket {}", path.display());
        let _ = fs::remove_file(path);
    }
    UnixListener::bind(path).map_err(|source| Error::IoError {
        message: format!("failed to bind {}", path.display()),
        source,
    })
}

fn accept_loop(listener: &UnixListener, running: &AtomicBool, shared: &Shared) {
    for connection in listener.incoming() {
        if !running.load(Ordering::Relaxed) {
            break;
        }
        match connection {
            Ok(stream) => {
                if let Err(err) = handle_connection(stream, shared) {
                    warn!("connection error: {err}");
                }
            }
            Err(err) => warn!("accept failed: {err}"),
        }
    }
    debug!("accept loop stopped");
}

/// Handle one submission: decode, validate, ack, enqueue.
///
/// Decoded strings are moved into the task before the ack, so nothing
/// queued borrows from the connection buffer. The ack always precedes the
/// enqueue; an enqueue failure after the ack surfaces on the callback, not
/// here, because the submitter has already moved on.
fn handle_connection(mut stream: UnixStream, shared: &Shared) -> Result<()> {
    stream.set_read_timeout(Some(CONNECTION_TIMEOUT))?;
    stream.set_write_timeout(Some(CONNECTION_TIMEOUT))?;

    let mut buf = vec![0u8; wire::REQUEST_WINDOW];
    let n = stream.read(&mut buf)?;
    if n == 0 {
        return Ok(());
    }

    let request = match wire::decode_request(&buf[..n]) {
        Ok(request) => request,
        Err(reject) => {
            debug!("rejecting submission {}: {}", reject.id, reject.error.token());
            let frame = wire::encode(&wire::ErrorFrame::new(&reject.id, &reject.error))?;
            stream.write_all(&frame)?;
            return Ok(());
        }
    };

    let ack = wire::encode(&wire::Ack::accepted(&request.id))?;
    stream.write_all(&ack)?;

    let ranked = request.ranked;
    let priority = request.priority;
    let task = UnrankedTask {
        id: request.id,
        text: request.text,
        callback: request.callback,
        model_id: request.model_id,
        max_tokens: request.max_tokens,
    };

    if ranked {
        shared.unranked.push(task);
    } else {
        let id = task.id.clone();
        let endpoint = task.callback.clone();
        let priority = priority.unwrap_or(Priority::Normal);
        if let Err(err) = shared.ranked.push(task, priority) {
            warn!("direct admission failed for task {id}: {err}");
            let frame = wire::ErrorFrame::new(&id, &err.wire_error());
            if let Err(err) = callback::deliver(&endpoint, &frame) {
                warn!("error frame for task {id} dropped: {err}");
            }
        }
    }

    Ok(())
}
