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

//! End-to-end tests over a real socket: submit, ack, callback.

use granville::backend::{Backend, EchoBackend, LoadedModel};
use granville::error::Result;
use granville::server::wire::{Ack, ErrorFrame};
use granville::{Error, Server, ServerConfig};
use serial_test::serial;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

mod common;
use common::*;

fn echo_server(dir: &TempDir, models: usize) -> Server {
    let mut builder = ServerConfig::builder().socket_path(socket_path(dir));
    for spec in model_specs(dir, models) {
        builder = builder.model_spec(spec);
    }
    Server::start(builder.build().unwrap(), Box::new(EchoBackend)).unwrap()
}

/// Stub driver that answers every prompt with a CRITICAL classification.
#[derive(Debug)]
struct ShoutyBackend;

impl Backend for ShoutyBackend {
    fn name(&self) -> &str {
        "shouty"
    }

    fn version(&self) -> &str {
        "0.0.0"
    }

    fn load(&self, _path: &Path) -> Result<Arc<dyn LoadedModel>> {
        Ok(Arc::new(ShoutyModel))
    }
}

#[derive(Debug)]
struct ShoutyModel;

impl LoadedModel for ShoutyModel {
    fn generate(&self, _prompt: &str, _max_tokens: u32) -> Result<String> {
        Ok("PRIORITY: CRITICAL".to_string())
    }
}

#[test]
#[serial]
fn test_happy_path_chat() {
    let dir = TempDir::new().unwrap();
    let server = echo_server(&dir, 1);
    let cb = CallbackListener::bind(&dir, "cb.sock");

    let id = Uuid::new_v4().to_string();
    let reply = submit(
        server.socket_path(),
        &Submit::new(&id, "hello", &cb.endpoint()),
    );
    expect_ack(&reply, &id);

    let result = cb.next_result();
    assert_eq!(result.id, id);
    assert_eq!(result.model_id, 1);
    assert_eq!(result.tool_id, "__chat__");
    assert_eq!(result.tool_input_json, "[\"hello\"]");
    assert_eq!(result.priority, "normal");

    server.shutdown();
}

#[test]
#[serial]
fn test_result_json_escapes_special_characters() {
    let dir = TempDir::new().unwrap();
    let server = echo_server(&dir, 1);
    let cb = CallbackListener::bind(&dir, "cb.sock");

    let text = r#"quote " and backslash \ here"#;
    let reply = submit(
        server.socket_path(),
        &Submit::new("esc", text, &cb.endpoint()).ranked(false),
    );
    expect_ack(&reply, "esc");

    let result = cb.next_result();
    let decoded: Vec<String> = serde_json::from_str(&result.tool_input_json).unwrap();
    assert_eq!(decoded, vec![text.to_string()]);

    server.shutdown();
}

#[test]
#[serial]
fn test_skip_ranking_bypasses_classifier() {
    let dir = TempDir::new().unwrap();
    let mut builder = ServerConfig::builder().socket_path(socket_path(&dir));
    for spec in model_specs(&dir, 1) {
        builder = builder.model_spec(spec);
    }
    let server = Server::start(builder.build().unwrap(), Box::new(ShoutyBackend)).unwrap();
    let cb = CallbackListener::bind(&dir, "cb.sock");

    // the classifier would say critical, but ranked=false never asks it
    let reply = submit(
        server.socket_path(),
        &Submit::new("b", "hi", &cb.endpoint()).ranked(false),
    );
    expect_ack(&reply, "b");
    let result = cb.next_result();
    assert_eq!(result.id, "b");
    assert_eq!(result.priority, "normal");

    // the same submission through the ranker does come back critical
    let reply = submit(
        server.socket_path(),
        &Submit::new("b2", "hi", &cb.endpoint()).ranked(true),
    );
    expect_ack(&reply, "b2");
    assert_eq!(cb.next_result().priority, "critical");

    server.shutdown();
}

#[test]
#[serial]
fn test_direct_submission_priority_honoured() {
    let dir = TempDir::new().unwrap();
    let server = echo_server(&dir, 1);
    let cb = CallbackListener::bind(&dir, "cb.sock");

    let reply = submit(
        server.socket_path(),
        &Submit::new("c", "hi", &cb.endpoint())
            .ranked(false)
            .priority("critical"),
    );
    expect_ack(&reply, "c");
    assert_eq!(cb.next_result().priority, "critical");

    server.shutdown();
}

#[test]
#[serial]
fn test_priority_preemption() {
    let dir = TempDir::new().unwrap();
    let (backend, control) = GatedBackend::new();
    let mut builder = ServerConfig::builder()
        .socket_path(socket_path(&dir))
        .worker_count(1);
    for spec in model_specs(&dir, 1) {
        builder = builder.model_spec(spec);
    }
    let server = Server::start(builder.build().unwrap(), Box::new(backend)).unwrap();

    // occupy the only worker so the next three submissions stay queued
    let blocker_cb = CallbackListener::bind(&dir, "blocker.sock");
    let reply = submit(
        server.socket_path(),
        &Submit::new("blocker", "busy", &blocker_cb.endpoint()).ranked(false),
    );
    expect_ack(&reply, "blocker");
    assert!(control.wait_for_inflight(1, TIMEOUT));

    let cb = CallbackListener::bind(&dir, "cb.sock");
    for (id, priority) in [("low", "low"), ("critical", "critical"), ("normal", "normal")] {
        let reply = submit(
            server.socket_path(),
            &Submit::new(id, id, &cb.endpoint())
                .ranked(false)
                .priority(priority),
        );
        expect_ack(&reply, id);
    }

    control.open_all();
    blocker_cb.next_result();

    let completion: Vec<String> = (0..3).map(|_| cb.next_result().id).collect();
    assert_eq!(completion, vec!["critical", "normal", "low"]);

    server.shutdown();
}

#[test]
#[serial]
fn test_least_busy_routing() {
    let dir = TempDir::new().unwrap();
    let (backend, control) = GatedBackend::new();
    let mut builder = ServerConfig::builder()
        .socket_path(socket_path(&dir))
        .worker_count(4);
    for spec in model_specs(&dir, 2) {
        builder = builder.model_spec(spec);
    }
    let server = Server::start(builder.build().unwrap(), Box::new(backend)).unwrap();
    let cb = CallbackListener::bind(&dir, "cb.sock");

    for i in 0..4 {
        let reply = submit(
            server.socket_path(),
            &Submit::new(&format!("t{i}"), "work", &cb.endpoint()).ranked(false),
        );
        expect_ack(&reply, &format!("t{i}"));
    }

    // with both gates closed the load must split {2, 2}, not {4, 0}
    assert!(control.wait_for_inflight(4, TIMEOUT));
    assert_eq!(control.inflight(), vec![2, 2]);
    assert_eq!(server.pool().active_requests(1), Some(2));
    assert_eq!(server.pool().active_requests(2), Some(2));

    // opening the second model's gate drains the second model first
    control.open(1);
    assert_eq!(cb.next_result().model_id, 2);
    assert_eq!(cb.next_result().model_id, 2);

    control.open(0);
    assert_eq!(cb.next_result().model_id, 1);
    assert_eq!(cb.next_result().model_id, 1);

    assert_eq!(server.pool().active_requests(1), Some(0));
    assert_eq!(server.pool().active_requests(2), Some(0));

    server.shutdown();
}

#[test]
#[serial]
fn test_queue_full_rejection() {
    let dir = TempDir::new().unwrap();
    let (backend, control) = GatedBackend::new();
    let mut builder = ServerConfig::builder()
        .socket_path(socket_path(&dir))
        .worker_count(1)
        .queue_size(2);
    for spec in model_specs(&dir, 1) {
        builder = builder.model_spec(spec);
    }
    let server = Server::start(builder.build().unwrap(), Box::new(backend)).unwrap();

    let blocker_cb = CallbackListener::bind(&dir, "blocker.sock");
    let reply = submit(
        server.socket_path(),
        &Submit::new("blocker", "busy", &blocker_cb.endpoint()).ranked(false),
    );
    expect_ack(&reply, "blocker");
    assert!(control.wait_for_inflight(1, TIMEOUT));

    let fill_cb = CallbackListener::bind(&dir, "fill.sock");
    for id in ["f1", "f2"] {
        let reply = submit(
            server.socket_path(),
            &Submit::new(id, "queued", &fill_cb.endpoint()).ranked(false),
        );
        expect_ack(&reply, id);
    }

    // admission is checked after the ack; the rejection arrives async
    let reject_cb = CallbackListener::bind(&dir, "reject.sock");
    let reply = submit(
        server.socket_path(),
        &Submit::new("f3", "one too many", &reject_cb.endpoint()).ranked(false),
    );
    expect_ack(&reply, "f3");

    let error = reject_cb.next_error();
    assert_eq!(error.id, "f3");
    assert_eq!(error.error, "queue_full");
    assert_eq!(error.code, 429);

    control.open_all();
    blocker_cb.next_result();
    fill_cb.next_result();
    fill_cb.next_result();

    server.shutdown();
}

#[test]
#[serial]
fn test_missing_text_field() {
    let dir = TempDir::new().unwrap();
    let server = echo_server(&dir, 1);
    let cb = CallbackListener::bind(&dir, "cb.sock");

    let envelope = Submit {
        id: Some("x".to_string()),
        callback: Some(cb.endpoint()),
        ..Submit::default()
    };
    let reply = submit(server.socket_path(), &envelope);

    // the one frame on the connection is the error; no ack preceded it
    let error: ErrorFrame = rmp_serde::from_slice(&reply).unwrap();
    assert_eq!(error.id, "x");
    assert_eq!(error.error, "missing_text");
    assert_eq!(error.code, 400);
    assert!(rmp_serde::from_slice::<Ack>(&reply).is_err());

    // and the callback endpoint is never contacted
    assert!(cb.try_next_frame(Duration::from_millis(300)).is_none());

    server.shutdown();
}

#[test]
#[serial]
fn test_undecodable_envelope() {
    let dir = TempDir::new().unwrap();
    let server = echo_server(&dir, 1);

    let reply = send_raw(server.socket_path(), b"this is not msgpack");
    let error: ErrorFrame = rmp_serde::from_slice(&reply).unwrap();
    assert_eq!(error.id, "unknown");
    assert_eq!(error.error, "invalid_request");
    assert_eq!(error.code, 400);

    // the server keeps accepting after a bad connection
    let cb = CallbackListener::bind(&dir, "cb.sock");
    let reply = submit(
        server.socket_path(),
        &Submit::new("after", "still up", &cb.endpoint()).ranked(false),
    );
    expect_ack(&reply, "after");
    cb.next_result();

    server.shutdown();
}

#[test]
#[serial]
fn test_pinned_model_routing() {
    let dir = TempDir::new().unwrap();
    let server = echo_server(&dir, 2);
    let cb = CallbackListener::bind(&dir, "cb.sock");

    let reply = submit(
        server.socket_path(),
        &Submit::new("pinned", "hi", &cb.endpoint())
            .ranked(false)
            .model_id(2),
    );
    expect_ack(&reply, "pinned");
    assert_eq!(cb.next_result().model_id, 2);

    // a pin to a model that does not exist fails after the ack
    let reply = submit(
        server.socket_path(),
        &Submit::new("ghost", "hi", &cb.endpoint())
            .ranked(false)
            .model_id(99),
    );
    expect_ack(&reply, "ghost");
    let error = cb.next_error();
    assert_eq!(error.id, "ghost");
    assert_eq!(error.error, "internal_error");
    assert_eq!(error.code, 500);

    server.shutdown();
}

#[test]
#[serial]
fn test_max_tokens_bounds_generation() {
    let dir = TempDir::new().unwrap();
    let server = echo_server(&dir, 1);
    let cb = CallbackListener::bind(&dir, "cb.sock");

    let reply = submit(
        server.socket_path(),
        &Submit::new("short", "one two three four five", &cb.endpoint())
            .ranked(false)
            .max_tokens(3),
    );
    expect_ack(&reply, "short");
    assert_eq!(cb.next_result().tool_input_json, "[\"one two three\"]");

    server.shutdown();
}

#[test]
fn test_startup_requires_loadable_models() {
    use granville::model_spec::{ModelKind, ModelSpec};

    let dir = TempDir::new().unwrap();
    let config = ServerConfig::builder()
        .socket_path(socket_path(&dir))
        .model_spec(ModelSpec {
            kind: ModelKind::Inference,
            id: None,
            path: "/nonexistent/model.gguf".to_string(),
        })
        .build()
        .unwrap();
    let err = Server::start(config, Box::new(EchoBackend)).unwrap_err();
    assert!(matches!(err, Error::ModelLoadFailed { .. }));
}

#[test]
fn test_startup_requires_a_model_spec() {
    let err = ServerConfig::builder().build().unwrap_err();
    assert!(err.to_string().to_lowercase().contains("model"));
}
