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

//! Task urgency levels.
//!
//! Declaration order doubles as the dispatch order: `Critical` sorts before
//! `Low`, so the derived `Ord` gives "smaller is stronger" directly.

use std::fmt;

/// Urgency assigned to a task, either by the ranker or by the submitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    /// Dispatched before everything else
    Critical,
    /// Dispatched before normal work
    High,
    /// The default urgency
    #[default]
    Normal,
    /// Dispatched only when nothing stronger is waiting
    Low,
}

impl Priority {
    /// All levels, strongest first
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    /// Parse a priority token case-insensitively.
    ///
    /// Anything that is not a known token maps to `Normal`; submitters are
    /// never rejected over an unrecognized priority.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Self::Critical,
            "high" => Self::High,
            "low" => Self::Low,
            _ => Self::Normal,
        }
    }

    /// The stable lowercase token used on the wire
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
