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

//! Model spec strings from the command line.
//!
//! Grammar: `path` | `type:path` | `type:id:path`. A leading segment that is
//! not a known type name is treated as part of the path, so drive-letter
//! paths like `C:\models\x.gguf` parse as bare paths.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Role a loaded model plays in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelKind {
    /// Text generation
    Inference,
    /// Speech to text
    Stt,
    /// Text to speech
    Tts,
    /// Embedding generation
    Embedding,
    /// No declared role; matches any type filter during selection
    #[default]
    Unassigned,
}

impl ModelKind {
    /// Parse a type token; `None` when the token is not a known type.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "inference" => Some(Self::Inference),
            "stt" => Some(Self::Stt),
            "tts" => Some(Self::Tts),
            "embedding" => Some(Self::Embedding),
            "unassigned" => Some(Self::Unassigned),
            _ => None,
        }
    }

    /// The lowercase token used in spec strings
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inference => "inference",
            Self::Stt => "stt",
            Self::Tts => "tts",
            Self::Embedding => "embedding",
            Self::Unassigned => "unassigned",
        }
    }
}

/// One model to load at startup, parsed from a colon-delimited spec string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    /// Declared role of the model
    pub kind: ModelKind,
    /// Explicit pool id; `None` lets the pool auto-assign the next id
    pub id: Option<u32>,
    /// Path to the model file, passed to the driver as given
    pub path: String,
}

impl ModelSpec {
    fn bare(path: &str) -> Result<Self> {
        if path.is_empty() {
            return Err(Error::InvalidModelSpec {
                spec: path.to_string(),
            });
        }
        Ok(Self {
            kind: ModelKind::Unassigned,
            id: None,
            path: path.to_string(),
        })
    }

    fn typed(spec: &str, kind: ModelKind, id: Option<u32>, path: &str) -> Result<Self> {
        if path.is_empty() {
            return Err(Error::InvalidModelSpec {
                spec: spec.to_string(),
            });
        }
        Ok(Self {
            kind,
            id,
            path: path.to_string(),
        })
    }
}

impl FromStr for ModelSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.splitn(3, ':').collect();
        match parts.as_slice() {
            [path] => Self::bare(path),
            [head, rest] => match ModelKind::parse(head) {
                Some(kind) => Self::typed(s, kind, None, rest),
                None => Self::bare(s),
            },
            [head, mid, tail] => {
                let Some(kind) = ModelKind::parse(head) else {
                    return Self::bare(s);
                };
                match mid.parse::<u32>() {
                    Ok(0) => Err(Error::InvalidModelSpec {
                        spec: s.to_string(),
                    }),
                    Ok(id) => Self::typed(s, kind, Some(id), tail),
                    // not an id; the rest of the string is the path
                    Err(_) => Self::typed(s, kind, None, &s[head.len() + 1..]),
                }
            }
            _ => unreachable!("splitn(3) yields at most three parts"),
        }
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.id) {
            (ModelKind::Unassigned, None) => write!(f, "{}", self.path),
            (kind, None) => write!(f, "{}:{}", kind.as_str(), self.path),
            (kind, Some(id)) => write!(f, "{}:{}:{}", kind.as_str(), id, self.path),
        }
    }
}
