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

mod host;
mod logging;
pub mod signal;

pub use host::Host;

use dso_configuration::{Config, Options};
use dso_error::Context;
use tracing::info;

pub type Error = dso_error::Error;
pub type Result<T> = dso_error::Result<T>;

pub fn run() -> Result<()> {
    let options = Options::parse_options();
    let config = Config::new(&options).with_context_msg(format!("failed to load {}", options.config.display()))?;
    let _log_guard = logging::init(&config.logging)?;
    info!(config = %options.config.display(), workers = config.runtime.num_workers(), "starting dso host");

    let host = Host::build(&config.bootstrap)?;
    if options.validate {
        info!("configuration and dso libraries are valid");
        return Ok(());
    }

    let (control_tx, _signal_handle) = signal::spawn_signal_handler().context("failed to spawn signal handler")?;
    host.run(config.runtime.num_workers(), signal::create_control_receiver(&control_tx))
}
