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

use super::{dso_filter::DsoFilter, route::RouteConfiguration};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// The http part of a listener: its filter chain and where its routes come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionManagerConfig {
    pub name: CompactString,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub http_filters: Vec<HttpFilter>,
    #[serde(flatten)]
    pub route_specifier: RouteSpecifier,
}

impl ConnectionManagerConfig {
    /// The first enabled dynamic module filter of the chain.
    pub fn dso_filter(&self) -> Option<(&CompactString, &DsoFilter)> {
        self.http_filters.iter().filter(|f| !f.disabled).find_map(|f| match &f.filter {
            HttpFilterType::Dso(dso) => Some((&f.name, dso)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSpecifier {
    RouteConfig(RouteConfiguration),
    Rds(RdsSpecifier),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RdsSpecifier {
    pub route_config_name: CompactString,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpFilter {
    pub name: CompactString,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub disabled: bool,
    #[serde(flatten)]
    pub filter: HttpFilterType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "filter_type", content = "filter_settings", rename_all = "snake_case")]
pub enum HttpFilterType {
    Dso(DsoFilter),
}
