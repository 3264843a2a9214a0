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

use super::{dso_filter::DsoPerRoute, ConfigError};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteConfiguration {
    pub name: CompactString,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub virtual_hosts: Vec<VirtualHost>,
}

impl RouteConfiguration {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for domain in self.virtual_hosts.iter().flat_map(|vh| vh.domains.iter()) {
            if !seen.insert(domain.to_ascii_lowercase()) {
                return Err(ConfigError::DuplicateDomain { route_config: self.name.clone(), domain: domain.clone() });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VirtualHost {
    pub name: CompactString,
    pub domains: Vec<CompactString>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub routes: Vec<Route>,
    /// keyed by http filter name
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub typed_per_filter_config: HashMap<CompactString, DsoPerRoute>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<CompactString>,
    #[serde(rename = "match")]
    pub route_match: RouteMatch,
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub typed_per_filter_config: HashMap<CompactString, DsoPerRoute>,
    #[serde(skip_serializing_if = "Metadata::is_empty", default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteMatch {
    Prefix(CompactString),
    Path(CompactString),
}

impl RouteMatch {
    pub fn matches(&self, path: &str) -> bool {
        // query strings never take part in matching
        let path = path.split_once('?').map_or(path, |(path, _)| path);
        match self {
            Self::Prefix(prefix) => path.starts_with(prefix.as_str()),
            Self::Path(exact) => path == exact.as_str(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub filter_metadata: HashMap<CompactString, JsonValue>,
}

impl Metadata {
    pub fn is_empty(&self) -> bool {
        self.filter_metadata.is_empty()
    }
}
