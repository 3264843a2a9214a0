// Copyright 2025 The kmesh Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

use compact_str::CompactString;
use std::path::PathBuf;
use thiserror::Error;

/// Rejection of a configuration (bootstrap or route update).
///
/// A `ConfigError` never affects traffic: the snapshot that was active before the update stays active.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("invalid configuration at `{location}`: {message}")]
    Parse { location: String, message: String },
    #[error("duplicate dso library id `{0}`")]
    DuplicateLibrary(CompactString),
    #[error("filter `{filter}` references unknown dso library `{library_id}`")]
    UnknownLibrary { filter: CompactString, library_id: CompactString },
    #[error("duplicate connection manager `{0}`")]
    DuplicateConnectionManager(CompactString),
    #[error("domain `{domain}` appears more than once in route configuration `{route_config}`")]
    DuplicateDomain { route_config: CompactString, domain: CompactString },
    #[error("plugin `{plugin}`: {scope} declares type url `{found}` but the filter declares `{expected}`")]
    ConflictingTypeUrl { plugin: CompactString, scope: &'static str, expected: CompactString, found: CompactString },
    #[error("plugin `{plugin}` rejected its configuration: {reason}")]
    Rejected { plugin: CompactString, reason: String },
}

impl ConfigError {
    pub(crate) fn from_yaml(err: serde_path_to_error::Error<serde_yaml::Error>) -> Self {
        let location = err.path().to_string();
        Self::Parse { location, message: err.into_inner().to_string() }
    }
}
