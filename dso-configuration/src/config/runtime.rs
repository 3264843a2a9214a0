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
use std::{env::var, num::NonZeroUsize};

use crate::options::Options;

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone)]
pub struct Runtime {
    /// worker threads driving event loops
    #[serde(default = "non_zero_num_cpus")]
    pub num_workers: NonZeroUsize,
}

impl Default for Runtime {
    fn default() -> Self {
        Self { num_workers: non_zero_num_cpus() }
    }
}

impl Runtime {
    #[must_use]
    pub fn update_from_env_and_options(self, opt: &Options) -> Self {
        Runtime {
            num_workers: var("DSO_WORKERS")
                .ok()
                .and_then(|v| v.parse::<NonZeroUsize>().ok())
                .or(opt.num_workers)
                .unwrap_or(self.num_workers),
        }
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers.get()
    }
}

fn non_zero_num_cpus() -> NonZeroUsize {
    NonZeroUsize::new(num_cpus::get()).unwrap_or(NonZeroUsize::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_override_config() {
        let runtime = Runtime { num_workers: NonZeroUsize::MIN };
        let mut opt = Options::from_path("bootstrap.yaml");
        opt.num_workers = NonZeroUsize::new(3);
        if var("DSO_WORKERS").is_err() {
            assert_eq!(runtime.update_from_env_and_options(&opt).num_workers(), 3);
        }
    }

    #[test]
    fn defaults_to_cpus() {
        let runtime: Runtime = serde_yaml::from_str("{}").unwrap();
        assert_eq!(runtime.num_workers(), num_cpus::get().max(1));
    }
}
