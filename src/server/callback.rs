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

//! Outbound one-shot delivery to submitter callback endpoints.
//!
//! A result or error frame travels on its own connection: connect, write
//! one frame, close. There is no read-back and no retry; a failed delivery
//! is the caller's to log.
//!
//! The transport is platform-variant (Unix stream socket vs named pipe),
//! so connecting goes through [`OutboundChannel`] and the implementation
//! is chosen at compile time.

use crate::error::{Error, Result};
use crate::server::wire;
use serde::Serialize;
use std::io::{self, Write};

/// Connector for the platform's local IPC transport.
pub trait OutboundChannel {
    /// The connected writer type
    type Writer: Write;

    /// Open a channel to the endpoint string supplied by the submitter.
    ///
    /// # Errors
    ///
    /// Returns the underlying connect error.
    fn connect(endpoint: &str) -> io::Result<Self::Writer>;
}

/// Unix domain stream sockets
#[cfg(unix)]
pub struct UnixChannel;

#[cfg(unix)]
impl OutboundChannel for UnixChannel {
    type Writer = std::os::unix::net::UnixStream;

    fn connect(endpoint: &str) -> io::Result<Self::Writer> {
        std::os::unix::net::UnixStream::connect(endpoint)
    }
}

/// Named pipes, addressed as `\\.\pipe\<name>`
#[cfg(windows)]
pub struct NamedPipeChannel;

#[cfg(windows)]
impl OutboundChannel for NamedPipeChannel {
    type Writer = std::fs::File;

    fn connect(endpoint: &str) -> io::Result<Self::Writer> {
        let path = if endpoint.starts_with(r"\\.\pipe\") {
            endpoint.to_string()
        } else {
            format!(r"\\.\pipe\{endpoint}")
        };
        std::fs::OpenOptions::new().read(true).write(true).open(path)
    }
}

#[cfg(unix)]
type PlatformChannel = UnixChannel;
#[cfg(windows)]
type PlatformChannel = NamedPipeChannel;

/// Deliver a single frame to a callback endpoint.
///
/// # Errors
///
/// Returns [`Error::CallbackFailed`] when the endpoint cannot be reached
/// or the write fails, and an encoding error for unserializable frames.
pub fn deliver<T: Serialize>(endpoint: &str, frame: &T) -> Result<()> {
    let bytes = wire::encode(frame)?;
    let mut writer =
        PlatformChannel::connect(endpoint).map_err(|source| Error::CallbackFailed {
            endpoint: endpoint.to_string(),
            source,
        })?;
    writer
        .write_all(&bytes)
        .map_err(|source| Error::CallbackFailed {
            endpoint: endpoint.to_string(),
            source,
        })?;
    Ok(())
}
