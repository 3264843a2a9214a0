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

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::options::Options;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    /// `EnvFilter` directive, e.g. `info,dso::scheduler=debug`
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub log_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub log_directory: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub log_file: Option<String>,
}

impl Log {
    #[must_use]
    pub fn update_from_options(self, opt: &Options) -> Self {
        Self { log_level: opt.log_level.clone().or(self.log_level), ..self }
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    pub fn log_file(&self) -> &str {
        self.log_file.as_deref().unwrap_or("dso.log")
    }
}
