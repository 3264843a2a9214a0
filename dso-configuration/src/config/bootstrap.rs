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

use super::{connection_manager::ConnectionManagerConfig, route::RouteConfiguration, ConfigError};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bootstrap {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub bootstrap_extensions: Vec<BootstrapExtension>,
    #[serde(default)]
    pub static_resources: StaticResources,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub dynamic_resources: Option<DynamicResources>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapExtension {
    Dso(DsoLibrary),
}

/// Directive to load one plugin module at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DsoLibrary {
    pub so_id: CompactString,
    pub so_path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticResources {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub connection_managers: Vec<ConnectionManagerConfig>,
}

/// Where route updates for `rds` connection managers are read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicResources {
    pub rds_path: PathBuf,
}

/// Contents of the file named by [`DynamicResources::rds_path`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteDiscoveryFile {
    #[serde(default)]
    pub resources: Vec<RouteConfiguration>,
}

impl RouteDiscoveryFile {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let file: Self =
            serde_path_to_error::deserialize(serde_yaml::Deserializer::from_str(yaml)).map_err(ConfigError::from_yaml)?;
        for route in &file.resources {
            route.validate()?;
        }
        Ok(file)
    }
}

impl Bootstrap {
    pub fn dso_libraries(&self) -> impl Iterator<Item = &DsoLibrary> {
        self.bootstrap_extensions.iter().map(|ext| match ext {
            BootstrapExtension::Dso(lib) => lib,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut libraries = HashSet::new();
        for lib in self.dso_libraries() {
            if !libraries.insert(lib.so_id.as_str()) {
                return Err(ConfigError::DuplicateLibrary(lib.so_id.clone()));
            }
        }
        let mut managers = HashSet::new();
        for manager in &self.static_resources.connection_managers {
            if !managers.insert(manager.name.as_str()) {
                return Err(ConfigError::DuplicateConnectionManager(manager.name.clone()));
            }
            if let Some((name, filter)) = manager.dso_filter() {
                if !libraries.contains(filter.library_id.as_str()) {
                    return Err(ConfigError::UnknownLibrary {
                        filter: name.clone(),
                        library_id: filter.library_id.clone(),
                    });
                }
            }
            if let super::connection_manager::RouteSpecifier::RouteConfig(routes) = &manager.route_specifier {
                routes.validate()?;
            }
        }
        Ok(())
    }
}
