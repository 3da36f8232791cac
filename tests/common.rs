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

//! Shared helpers for integration tests: a msgpack submitter, a callback
//! listener, and a gated stub driver whose generation blocks until a test
//! opens the corresponding gate.

#![allow(dead_code)]

use granville::backend::{Backend, LoadedModel};
use granville::error::Result;
use granville::model_spec::{ModelKind, ModelSpec};
use granville::server::wire::{Ack, ErrorFrame, ResultFrame};
use serde::Serialize;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Generous bound for anything the pipeline should do quickly
pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Write dummy model files and return specs pointing at them.
pub fn model_specs(dir: &TempDir, count: usize) -> Vec<ModelSpec> {
    (0..count)
        .map(|i| {
            let path = dir.path().join(format!("model-{i}.gguf"));
            std::fs::write(&path, b"dummy model file").unwrap();
            ModelSpec {
                kind: ModelKind::Unassigned,
                id: None,
                path: path.to_string_lossy().into_owned(),
            }
        })
        .collect()
}

/// Socket path inside the test scratch directory
pub fn socket_path(dir: &TempDir) -> PathBuf {
    dir.path().join("granville.sock")
}

/// Request envelope builder mirroring what a msgpack client sends.
#[derive(Debug, Default, Serialize)]
pub struct Submit {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ranked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

impl Submit {
    pub fn new(id: &str, text: &str, callback: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            text: Some(text.to_string()),
            callback: Some(callback.to_string()),
            ..Self::default()
        }
    }

    pub fn ranked(mut self, ranked: bool) -> Self {
        self.ranked = Some(ranked);
        self
    }

    pub fn priority(mut self, priority: &str) -> Self {
        self.priority = Some(priority.to_string());
        self
    }

    pub fn model_id(mut self, model_id: u64) -> Self {
        self.model_id = Some(model_id);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Send raw bytes over one connection and return the full reply.
pub fn send_raw(socket: &Path, bytes: &[u8]) -> Vec<u8> {
    let mut stream = UnixStream::connect(socket).unwrap();
    stream.set_read_timeout(Some(TIMEOUT)).unwrap();
    stream.write_all(bytes).unwrap();
    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).unwrap();
    reply
}

/// Encode and send an envelope, returning the raw reply.
pub fn submit(socket: &Path, envelope: &Submit) -> Vec<u8> {
    send_raw(socket, &rmp_serde::to_vec_named(envelope).unwrap())
}

/// Assert the reply is the ack for the given task id.
pub fn expect_ack(reply: &[u8], id: &str) {
    let ack: Ack = rmp_serde::from_slice(reply).expect("reply was not an ack frame");
    assert_eq!(ack.id, id);
    assert_eq!(ack.status, "accepted");
}

/// A bound callback endpoint collecting delivered frames.
pub struct CallbackListener {
    listener: UnixListener,
    path: PathBuf,
}

impl CallbackListener {
    pub fn bind(dir: &TempDir, name: &str) -> Self {
        let path = dir.path().join(name);
        let listener = UnixListener::bind(&path).unwrap();
        listener.set_nonblocking(true).unwrap();
        Self { listener, path }
    }

    /// The endpoint string a submitter would put in `callback`
    pub fn endpoint(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    /// Wait for the next delivered frame, up to `timeout`.
    pub fn try_next_frame(&self, timeout: Duration) -> Option<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.listener.accept() {
                Ok((mut stream, _)) => {
                    stream.set_nonblocking(false).unwrap();
                    stream.set_read_timeout(Some(TIMEOUT)).unwrap();
                    let mut bytes = Vec::new();
                    stream.read_to_end(&mut bytes).unwrap();
                    return Some(bytes);
                }
                Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return None;
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(err) => panic!("callback accept failed: {err}"),
            }
        }
    }

    pub fn next_frame(&self) -> Vec<u8> {
        self.try_next_frame(TIMEOUT)
            .expect("no callback frame arrived within the timeout")
    }

    pub fn next_result(&self) -> ResultFrame {
        rmp_serde::from_slice(&self.next_frame()).expect("frame was not a result")
    }

    pub fn next_error(&self) -> ErrorFrame {
        rmp_serde::from_slice(&self.next_frame()).expect("frame was not an error")
    }
}

/// One per-model gate; generation blocks until it opens.
#[derive(Debug)]
pub struct Gate {
    open: Mutex<bool>,
    signal: Condvar,
}

impl Gate {
    fn new() -> Self {
        Self {
            open: Mutex::new(false),
            signal: Condvar::new(),
        }
    }

    fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.signal.notify_all();
    }

    fn wait(&self) {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.signal.wait(open).unwrap();
        }
    }
}

#[derive(Debug)]
struct GatedShared {
    gates: Mutex<Vec<Arc<Gate>>>,
    inflight: Mutex<Vec<usize>>,
}

/// Stub driver whose models echo the prompt after their gate opens.
///
/// Models are indexed by load order (0, 1, 2); the control handle opens
/// gates and observes per-model in-flight generation counts.
#[derive(Debug)]
pub struct GatedBackend {
    shared: Arc<GatedShared>,
}

/// Test-side handle to a [`GatedBackend`]'s gates and counters.
#[derive(Clone)]
pub struct GatedControl {
    shared: Arc<GatedShared>,
}

impl GatedBackend {
    pub fn new() -> (Self, GatedControl) {
        let shared = Arc::new(GatedShared {
            gates: Mutex::new(Vec::new()),
            inflight: Mutex::new(Vec::new()),
        });
        (
            Self {
                shared: Arc::clone(&shared),
            },
            GatedControl { shared },
        )
    }
}

impl Backend for GatedBackend {
    fn name(&self) -> &str {
        "gated"
    }

    fn version(&self) -> &str {
        "0.0.0"
    }

    fn load(&self, _path: &Path) -> Result<Arc<dyn LoadedModel>> {
        let gate = Arc::new(Gate::new());
        let index = {
            let mut gates = self.shared.gates.lock().unwrap();
            gates.push(Arc::clone(&gate));
            self.shared.inflight.lock().unwrap().push(0);
            gates.len() - 1
        };
        Ok(Arc::new(GatedModel {
            shared: Arc::clone(&self.shared),
            index,
            gate,
        }))
    }
}

#[derive(Debug)]
struct GatedModel {
    shared: Arc<GatedShared>,
    index: usize,
    gate: Arc<Gate>,
}

impl LoadedModel for GatedModel {
    fn generate(&self, prompt: &str, _max_tokens: u32) -> Result<String> {
        self.shared.inflight.lock().unwrap()[self.index] += 1;
        self.gate.wait();
        self.shared.inflight.lock().unwrap()[self.index] -= 1;
        Ok(prompt.to_string())
    }
}

impl GatedControl {
    /// Open the gate of the model loaded at `index`.
    pub fn open(&self, index: usize) {
        self.shared.gates.lock().unwrap()[index].open();
    }

    /// Open every gate.
    pub fn open_all(&self) {
        for gate in self.shared.gates.lock().unwrap().iter() {
            gate.open();
        }
    }

    /// Per-model in-flight generation counts, by load order.
    pub fn inflight(&self) -> Vec<usize> {
        self.shared.inflight.lock().unwrap().clone()
    }

    /// Poll until the summed in-flight count reaches `total`.
    pub fn wait_for_inflight(&self, total: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.inflight().iter().sum::<usize>() >= total {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }
}
