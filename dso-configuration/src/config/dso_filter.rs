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

use crate::typed_struct::TypedStruct;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Namespace under which route metadata is exposed to plugins.
pub const DSO_FILTER_METADATA_NAMESPACE: &str = "envoy.filters.http.dso";

/// Listener level configuration of the dynamic module filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DsoFilter {
    /// `so_id` of a `dso` bootstrap extension
    pub library_id: CompactString,
    pub plugin_name: CompactString,
    #[serde(default)]
    pub merge_policy: MergePolicy,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub plugin_config: Option<TypedStruct>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergePolicy {
    /// Shallow key union of filter, virtual host and route config; more specific keys win.
    #[default]
    MergeVirtualhostRouterFilter,
    /// Shallow key union of virtual host and route config. Filter config is used only when neither is present.
    MergeVirtualhostRouter,
    /// The most specific present layer wins wholesale.
    Override,
}

/// Per virtual host / per route configuration, keyed by plugin name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DsoPerRoute {
    #[serde(default)]
    pub plugins_config: HashMap<CompactString, RouterPlugin>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterPlugin {
    Disabled(bool),
    Config(TypedStruct),
}

impl DsoPerRoute {
    pub fn plugin(&self, plugin_name: &str) -> Option<&RouterPlugin> {
        self.plugins_config.get(plugin_name)
    }
}
