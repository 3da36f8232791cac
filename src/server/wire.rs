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

//! Envelope types and MessagePack framing.
//!
//! Every frame is a single MessagePack map with string keys, so plain
//! `msgpack` clients interoperate without a schema. Structs therefore
//! encode through [`encode`] (named-map serialization), never the default
//! tuple form.

use crate::error::{Result, WireError};
use crate::priority::Priority;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Receive window for inbound request envelopes, in bytes
pub const REQUEST_WINDOW: usize = 8 * 1024;

/// Default generation budget when the envelope omits `max_tokens`
pub const DEFAULT_MAX_TOKENS: u32 = 256;

/// Raw envelope shape; every key optional so validation can name exactly
/// which required key is missing.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRequest {
    id: Option<String>,
    text: Option<String>,
    callback: Option<String>,
    model_id: Option<u64>,
    ranked: Option<bool>,
    max_tokens: Option<u64>,
    priority: Option<String>,
}

/// A validated submission envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Caller-supplied task id
    pub id: String,
    /// Text to classify and infer on
    pub text: String,
    /// Endpoint for asynchronous result delivery
    pub callback: String,
    /// Pin to a specific model
    pub model_id: Option<u32>,
    /// Whether the task goes through the ranker (default true)
    pub ranked: bool,
    /// Generation budget
    pub max_tokens: u32,
    /// Submitter-declared priority; only honoured when `ranked` is false
    pub priority: Option<Priority>,
}

/// A rejected envelope: which error frame to send back, and under which id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reject {
    /// The id to echo; `"unknown"` when none was parseable
    pub id: String,
    /// The admission error
    pub error: WireError,
}

impl Reject {
    fn unknown(error: WireError) -> Self {
        Self {
            id: "unknown".to_string(),
            error,
        }
    }
}

/// Decode and validate a request envelope.
///
/// # Errors
///
/// Returns a [`Reject`] describing the error frame to write on the inbound
/// connection; no task is created.
pub fn decode_request(buf: &[u8]) -> std::result::Result<Request, Reject> {
    let raw: RawRequest = match rmp_serde::from_slice(buf) {
        Ok(raw) => raw,
        Err(err) => {
            debug!("undecodable envelope: {err}");
            return Err(Reject::unknown(WireError::InvalidRequest));
        }
    };

    let id = match raw.id {
        Some(id) if !id.is_empty() => id,
        _ => return Err(Reject::unknown(WireError::MissingField("id"))),
    };
    let text = match raw.text {
        Some(text) => text,
        None => {
            return Err(Reject {
                id,
                error: WireError::MissingField("text"),
            })
        }
    };
    let callback = match raw.callback {
        Some(cb) if !cb.is_empty() => cb,
        _ => {
            return Err(Reject {
                id,
                error: WireError::MissingField("callback"),
            })
        }
    };
    let model_id = match raw.model_id {
        None => None,
        Some(value) => match u32::try_from(value) {
            Ok(v) if v > 0 => Some(v),
            _ => {
                return Err(Reject {
                    id,
                    error: WireError::InvalidRequest,
                })
            }
        },
    };
    let max_tokens = match raw.max_tokens {
        None => DEFAULT_MAX_TOKENS,
        Some(value) => match u32::try_from(value) {
            Ok(v) if v > 0 => v,
            _ => {
                return Err(Reject {
                    id,
                    error: WireError::InvalidRequest,
                })
            }
        },
    };

    Ok(Request {
        id,
        text,
        callback,
        model_id,
        ranked: raw.ranked.unwrap_or(true),
        max_tokens,
        priority: raw.priority.as_deref().map(Priority::parse),
    })
}

/// Acknowledgement written on the inbound connection after validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Echoed task id
    pub id: String,
    /// Always `"accepted"`
    pub status: String,
}

impl Ack {
    /// The ack frame for a task id
    pub fn accepted(id: &str) -> Self {
        Self {
            id: id.to_string(),
            status: "accepted".to_string(),
        }
    }
}

/// Error frame, written either on the inbound connection (admission
/// errors) or to the callback endpoint (post-ack errors).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrame {
    /// Echoed task id
    pub id: String,
    /// Short error token
    pub error: String,
    /// Stable numeric code
    pub code: u32,
}

impl ErrorFrame {
    /// Build the frame for a wire error
    pub fn new(id: &str, error: &WireError) -> Self {
        Self {
            id: id.to_string(),
            error: error.token(),
            code: error.code(),
        }
    }
}

/// Result frame delivered to the callback endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultFrame {
    /// Echoed task id
    pub id: String,
    /// Model that served the task
    pub model_id: u32,
    /// Tool the result belongs to; plain chat results use `"__chat__"`
    pub tool_id: String,
    /// JSON array holding the generated text as its single element
    pub tool_input_json: String,
    /// Priority token the task ran at
    pub priority: String,
}

/// Encode any frame as a MessagePack map with string keys.
///
/// # Errors
///
/// Returns an encoding error; callers treat it as internal.
pub fn encode<T: Serialize>(frame: &T) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec_named(frame)?)
}
