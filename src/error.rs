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

use std::path::PathBuf;
use thiserror::Error;

/// Custom error type for the granville library
#[derive(Error, Debug)]
pub enum Error {
    /// Error in configuration
    #[error("Configuration error: {message}")]
    ConfigurationError {
        /// Description of the configuration error
        message: String,
    },

    /// Error when a model spec string does not match the accepted grammar
    #[error("Invalid model spec: {spec}")]
    InvalidModelSpec {
        /// The spec string that failed to parse
        spec: String,
    },

    /// Error when the requested driver is not registered
    #[error("Driver not found: {name}")]
    DriverNotFound {
        /// Name of the requested driver
        name: String,
    },

    /// Error when model loading fails
    #[error("Failed to load model from path: {path}")]
    ModelLoadFailed {
        /// Path to the model that failed to load
        path: PathBuf,
        #[source]
        /// Underlying error from the driver
        source: anyhow::Error,
    },

    /// Error when a task names a model id that is not in the pool
    #[error("Model not found: {id}")]
    ModelNotFound {
        /// The requested model id
        id: u32,
    },

    /// Error when a model path exceeds the driver input bound
    #[error("Model path too long: {len} bytes (max {max})")]
    PathTooLong {
        /// Actual path length in bytes
        len: usize,
        /// Maximum accepted length
        max: usize,
    },

    /// Error when a prompt exceeds the driver input bound
    #[error("Prompt too long: {len} bytes (max {max})")]
    PromptTooLong {
        /// Actual prompt length in bytes
        len: usize,
        /// Maximum accepted length
        max: usize,
    },

    /// Error when the ranked queue is at capacity
    #[error("Queue full: capacity {capacity} reached")]
    QueueFull {
        /// Configured queue capacity
        capacity: usize,
    },

    /// Error during text generation
    #[error("Failed to generate text: {message}")]
    GenerationFailed {
        /// Description of what went wrong
        message: String,
        #[source]
        /// Optional underlying error
        source: Option<anyhow::Error>,
    },

    /// Error delivering a frame to a submitter callback endpoint
    #[error("Callback delivery failed: {endpoint}")]
    CallbackFailed {
        /// The endpoint that could not be reached
        endpoint: String,
        #[source]
        /// The underlying I/O error
        source: std::io::Error,
    },

    /// I/O operation error
    #[error("IO error: {message}")]
    IoError {
        /// Description of I/O error
        message: String,
        #[source]
        /// The underlying I/O error
        source: std::io::Error,
    },

    /// Error encoding a wire frame
    #[error("Frame encoding failed")]
    Encode(#[from] rmp_serde::encode::Error),
}

impl Error {
    /// Create a configuration error with a custom message
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
        }
    }

    /// Create a generation error with a custom message
    pub fn generation(message: impl Into<String>) -> Self {
        Self::GenerationFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a generation error with a source
    pub fn generation_with_source(message: impl Into<String>, source: anyhow::Error) -> Self {
        Self::GenerationFailed {
            message: message.into(),
            source: Some(source),
        }
    }

    /// The wire-level error this failure is reported as after an ack.
    ///
    /// Everything that is not an admission failure collapses into
    /// `internal_error` on the callback, except queue rejection and
    /// callback delivery failures which keep their own tokens.
    pub fn wire_error(&self) -> WireError {
        match self {
            Self::QueueFull { .. } => WireError::QueueFull,
            Self::CallbackFailed { .. } => WireError::CallbackFailed,
            _ => WireError::InternalError,
        }
    }
}

/// Type alias for Results in this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Convert `std::io::Error` to our Error type
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::IoError {
            message: err.to_string(),
            source: err,
        }
    }
}

/// The closed set of error tokens reported to submitters.
///
/// Each carries a stable numeric code alongside its short token; both go
/// into the error frame verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    /// Malformed envelope
    InvalidRequest,
    /// A required envelope key was absent
    MissingField(&'static str),
    /// Admission limit reached on the ranked queue
    QueueFull,
    /// Model output could not be parsed as a tool call (reserved)
    ParseError,
    /// Inference failed or the task could not be dispatched
    InternalError,
    /// The callback endpoint could not be reached
    CallbackFailed,
}

impl WireError {
    /// The short token placed in the `error` field of an error frame
    pub fn token(&self) -> String {
        match self {
            Self::InvalidRequest => "invalid_request".to_string(),
            Self::MissingField(field) => format!("missing_{field}"),
            Self::QueueFull => "queue_full".to_string(),
            Self::ParseError => "parse_error".to_string(),
            Self::InternalError => "internal_error".to_string(),
            Self::CallbackFailed => "callback_failed".to_string(),
        }
    }

    /// The stable numeric code placed in the `code` field of an error frame
    pub fn code(&self) -> u32 {
        match self {
            Self::InvalidRequest | Self::MissingField(_) => 400,
            Self::ParseError => 422,
            Self::QueueFull => 429,
            Self::InternalError => 500,
            Self::CallbackFailed => 502,
        }
    }
}
