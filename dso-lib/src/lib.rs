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

pub mod body;
pub mod config_merge;
pub mod dispatcher;
pub mod filter;
pub mod headers;
#[doc(hidden)]
pub mod isolation;
pub mod plugin;
pub mod routes;
pub mod scheduler;
pub mod stats;

pub use body::{BodyBuffer, BodyError, BodyMode};
pub use config_merge::{EffectiveConfig, RouteFilterConfig};
pub use dispatcher::{Dispatcher, Frame, ResetReason, StreamError, StreamEvent};
pub use filter::{AsyncResult, Direction, LocalReply, Phase, PhaseContext, PhaseStatus, PluginFault};
pub use headers::HeaderMap;
pub use plugin::{LoadError, PluginDescriptor, PluginLoader, PluginRegistry};
pub use routes::{ConnectionManager, RouteConfigurationChange, RoutesManager};
pub use scheduler::{Continuation, ContinuationToken, StreamId};
pub use stats::{HostStats, StatsSnapshot};

pub type Error = dso_error::Error;
pub type Result<T> = dso_error::Result<T>;
