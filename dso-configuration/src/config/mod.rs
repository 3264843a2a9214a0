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

pub mod bootstrap;
pub mod connection_manager;
pub mod dso_filter;
mod error;
pub mod log;
pub mod route;
pub mod runtime;

pub use bootstrap::Bootstrap;
pub use error::ConfigError;
pub use log::Log;
pub use runtime::Runtime;

use crate::options::Options;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub runtime: Runtime,
    #[serde(default)]
    pub logging: Log,
    #[serde(flatten)]
    pub bootstrap: Bootstrap,
}

impl Config {
    pub fn new(opt: &Options) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(&opt.config)
            .map_err(|source| ConfigError::Io { path: opt.config.clone(), source })?;
        let config = Self::from_yaml(&contents)?;
        Ok(Self {
            runtime: config.runtime.update_from_env_and_options(opt),
            logging: config.logging.update_from_options(opt),
            bootstrap: config.bootstrap,
        })
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_path_to_error::deserialize(serde_yaml::Deserializer::from_str(yaml)).map_err(ConfigError::from_yaml)?;
        config.bootstrap.validate()?;
        Ok(config)
    }
}
