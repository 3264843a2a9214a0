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

use dso_configuration::config::Log;
use dso_error::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins over the configured level.
pub(crate) fn env_filter(log: &Log) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log.log_level()))
        .with_context_msg(format!("invalid log level `{}`", log.log_level()))
}

/// Installs the global subscriber. Writing to `log_directory` goes through a non-blocking writer whose guard must be
/// held until exit, or buffered lines are lost.
pub fn init(log: &Log) -> Result<Option<WorkerGuard>> {
    let filter = env_filter(log)?;
    match &log.log_directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, log.log_file());
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(writer)
                .try_init()
                .context("failed to install log subscriber")?;
            Ok(Some(guard))
        },
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).try_init().context("failed to install log subscriber")?;
            Ok(None)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_level_is_checked() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let log = Log { log_level: Some("info,dso::scheduler=debug".to_owned()), ..Default::default() };
        assert!(env_filter(&log).is_ok());

        let log = Log { log_level: Some("dso::scheduler=loud".to_owned()), ..Default::default() };
        let err = env_filter(&log).unwrap_err();
        assert!(err.to_string().starts_with("invalid log level `dso::scheduler=loud`"));
    }
}
