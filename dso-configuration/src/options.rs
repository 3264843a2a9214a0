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

use clap::Parser;
use std::{num::NonZeroUsize, path::PathBuf};

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(version, about = "Host for dynamically loaded HTTP filter modules", long_about = None)]
pub struct Options {
    /// Path to the YAML bootstrap
    #[arg(short, long, value_name = "FILE")]
    pub config: PathBuf,
    /// Overrides `logging.log_level` when `RUST_LOG` is not set
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,
    #[arg(long, value_name = "N")]
    pub num_workers: Option<NonZeroUsize>,
    /// Load and check the configuration and every plugin module, then exit
    #[arg(long, default_value_t = false)]
    pub validate: bool,
}

impl Options {
    pub fn parse_options() -> Self {
        Self::parse()
    }

    pub fn from_path(config: impl Into<PathBuf>) -> Self {
        Self { config: config.into(), log_level: None, num_workers: None, validate: false }
    }
}
