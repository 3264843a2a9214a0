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

use arc_swap::ArcSwapOption;
use compact_str::CompactString;
use dso_configuration::{
    config::{
        connection_manager::{ConnectionManagerConfig, RouteSpecifier},
        dso_filter::{DsoFilter, RouterPlugin, DSO_FILTER_METADATA_NAMESPACE},
        route::{Route, RouteConfiguration, RouteMatch, VirtualHost},
    },
    typed_struct::TypedStruct,
    ConfigError,
};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    config_merge::{EffectiveConfig, RouteFilterConfig},
    headers::HeaderMap,
    plugin::{PluginDescriptor, PluginRegistry},
};

#[derive(Debug, Clone)]
pub enum RouteConfigurationChange {
    Added((String, RouteConfiguration)),
    Removed(String),
}

/// The plugin a stream runs, bound to the configuration resolved for its route.
#[derive(Debug)]
pub struct ResolvedFilter {
    pub plugin: Arc<PluginDescriptor>,
    pub plugin_name: CompactString,
    pub config: Arc<EffectiveConfig>,
}

/// What a stream captures when its route is matched. Immutable for the stream's lifetime.
#[derive(Debug, Default)]
pub struct MatchedRoute {
    pub name: Option<CompactString>,
    /// `None` when the plugin is disabled for this route
    pub filter: Option<Arc<ResolvedFilter>>,
    pub metadata: Option<JsonValue>,
}

#[derive(Debug)]
struct CompiledRoute {
    route_match: RouteMatch,
    matched: Arc<MatchedRoute>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum DomainMatch {
    Any,
    Exact(CompactString),
    /// `*.example.com`, stored as `.example.com`
    Suffix(CompactString),
    /// `example.*`, stored as `example.`
    Prefix(CompactString),
}

impl DomainMatch {
    fn parse(domain: &str) -> Self {
        let domain = domain.to_ascii_lowercase();
        if domain == "*" {
            Self::Any
        } else if let Some(suffix) = domain.strip_prefix('*') {
            Self::Suffix(suffix.into())
        } else if let Some(prefix) = domain.strip_suffix('*') {
            Self::Prefix(prefix.into())
        } else {
            Self::Exact(domain.into())
        }
    }

    /// Higher is more specific, `None` is no match.
    fn score(&self, host: &str) -> Option<usize> {
        match self {
            Self::Exact(exact) => (exact == host).then_some(usize::MAX),
            Self::Suffix(suffix) => host.ends_with(suffix.as_str()).then(|| 2 * suffix.len() + 1),
            Self::Prefix(prefix) => host.starts_with(prefix.as_str()).then(|| 2 * prefix.len()),
            Self::Any => Some(0),
        }
    }
}

#[derive(Debug)]
struct CompiledVirtualHost {
    name: CompactString,
    domains: Vec<DomainMatch>,
    routes: Vec<CompiledRoute>,
}

/// Route snapshot with every route's plugin configuration already resolved.
#[derive(Debug)]
pub struct RouteTable {
    name: CompactString,
    virtual_hosts: Vec<CompiledVirtualHost>,
}

impl RouteTable {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn find(&self, authority: &str, path: &str) -> Option<Arc<MatchedRoute>> {
        let host = authority.rsplit_once(':').map_or(authority, |(host, port)| {
            if port.bytes().all(|b| b.is_ascii_digit()) {
                host
            } else {
                authority
            }
        });
        let host = host.to_ascii_lowercase();
        let vhost = self
            .virtual_hosts
            .iter()
            .filter_map(|vh| vh.domains.iter().filter_map(|d| d.score(&host)).max().map(|score| (score, vh)))
            .max_by_key(|(score, _)| *score)
            .map(|(_, vh)| vh)?;
        let route = vhost.routes.iter().find(|r| r.route_match.matches(path));
        debug!(target: "dso::routes", virtual_host = %vhost.name, matched = route.is_some(), %path, "route lookup");
        route.map(|r| Arc::clone(&r.matched))
    }
}

#[derive(Debug)]
struct ListenerFilter {
    name: CompactString,
    settings: DsoFilter,
    plugin: Arc<PluginDescriptor>,
}

/// The http side of a listener: its dso filter and the currently published route snapshot.
#[derive(Debug)]
pub struct ConnectionManager {
    name: CompactString,
    filter: Option<ListenerFilter>,
    route_config_name: CompactString,
    routes: ArcSwapOption<RouteTable>,
    unrouted: Arc<MatchedRoute>,
}

impl ConnectionManager {
    pub fn build(config: &ConnectionManagerConfig, registry: &PluginRegistry) -> Result<Self, ConfigError> {
        let filter = match config.dso_filter() {
            Some((name, settings)) => {
                let plugin = registry.get(&settings.library_id).ok_or_else(|| ConfigError::UnknownLibrary {
                    filter: name.clone(),
                    library_id: settings.library_id.clone(),
                })?;
                Some(ListenerFilter { name: name.clone(), settings: settings.clone(), plugin })
            },
            None => None,
        };
        let route_config_name = match &config.route_specifier {
            RouteSpecifier::RouteConfig(routes) => routes.name.clone(),
            RouteSpecifier::Rds(rds) => rds.route_config_name.clone(),
        };
        let unrouted = Arc::new(MatchedRoute {
            name: None,
            filter: filter.as_ref().map(|f| Self::resolve_filter(f, None, None)).transpose()?,
            metadata: None,
        });
        let manager =
            Self { name: config.name.clone(), filter, route_config_name, routes: ArcSwapOption::empty(), unrouted };
        if let RouteSpecifier::RouteConfig(routes) = &config.route_specifier {
            manager.update_route(routes)?;
        }
        Ok(manager)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn route_config_name(&self) -> &str {
        &self.route_config_name
    }

    pub fn routes(&self) -> Option<Arc<RouteTable>> {
        self.routes.load_full()
    }

    /// Builds and publishes a new route snapshot. On error the current snapshot stays.
    pub fn update_route(&self, config: &RouteConfiguration) -> Result<(), ConfigError> {
        let table = self.compile(config)?;
        self.publish(table);
        Ok(())
    }

    pub fn remove_route(&self) {
        self.routes.store(None);
        info!(
            target: "dso::routes",
            manager = %self.name,
            route_config = %self.route_config_name,
            "route configuration removed"
        );
    }

    /// Matches a stream by its request headers. Streams outside any route run with the filter level config.
    pub fn match_stream(&self, headers: &HeaderMap) -> Arc<MatchedRoute> {
        let path = headers.path().unwrap_or("/");
        let authority = headers.authority().unwrap_or_default();
        self.routes
            .load()
            .as_ref()
            .and_then(|table| table.find(authority, path))
            .unwrap_or_else(|| Arc::clone(&self.unrouted))
    }

    fn publish(&self, table: Arc<RouteTable>) {
        self.routes.store(Some(table));
        info!(
            target: "dso::routes",
            manager = %self.name,
            route_config = %self.route_config_name,
            "route configuration published"
        );
    }

    fn compile(&self, config: &RouteConfiguration) -> Result<Arc<RouteTable>, ConfigError> {
        config.validate()?;
        let virtual_hosts = config
            .virtual_hosts
            .iter()
            .map(|vhost| {
                let routes = vhost
                    .routes
                    .iter()
                    .map(|route| {
                        Ok(CompiledRoute {
                            route_match: route.route_match.clone(),
                            matched: Arc::new(self.compile_route(vhost, route)?),
                        })
                    })
                    .collect::<Result<Vec<_>, ConfigError>>()?;
                let domains = vhost.domains.iter().map(|d| DomainMatch::parse(d)).collect();
                Ok(CompiledVirtualHost { name: vhost.name.clone(), domains, routes })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(Arc::new(RouteTable { name: config.name.clone(), virtual_hosts }))
    }

    fn compile_route(&self, vhost: &VirtualHost, route: &Route) -> Result<MatchedRoute, ConfigError> {
        let metadata = route.metadata.filter_metadata.get(DSO_FILTER_METADATA_NAMESPACE).cloned();
        let Some(filter) = &self.filter else {
            return Ok(MatchedRoute { name: route.name.clone(), filter: None, metadata });
        };
        let plugin_name = filter.settings.plugin_name.as_str();
        let per_vhost =
            vhost.typed_per_filter_config.get(&filter.name).and_then(|per_route| per_route.plugin(plugin_name));
        let per_route =
            route.typed_per_filter_config.get(&filter.name).and_then(|per_route| per_route.plugin(plugin_name));

        if let Some(RouterPlugin::Disabled(true)) = per_route.or(per_vhost) {
            debug!(target: "dso::routes", plugin = plugin_name, route = ?route.name, "plugin disabled for route");
            return Ok(MatchedRoute { name: route.name.clone(), filter: None, metadata });
        }
        let resolved = Self::resolve_filter(filter, config_layer(per_vhost), config_layer(per_route))?;
        Ok(MatchedRoute { name: route.name.clone(), filter: Some(resolved), metadata })
    }

    fn resolve_filter(
        filter: &ListenerFilter,
        virtual_host: Option<&TypedStruct>,
        route: Option<&TypedStruct>,
    ) -> Result<Arc<ResolvedFilter>, ConfigError> {
        let layers = RouteFilterConfig {
            policy: filter.settings.merge_policy,
            filter: filter.settings.plugin_config.clone(),
            virtual_host: virtual_host.cloned(),
            route: route.cloned(),
        };
        let plugin_name = &filter.settings.plugin_name;
        let config = layers.resolve(plugin_name)?;
        filter
            .plugin
            .call_validate_config(plugin_name, config.values())
            .map_err(|panic| format!("panicked: {panic}"))
            .and_then(|verdict| verdict)
            .map_err(|reason| ConfigError::Rejected { plugin: plugin_name.clone(), reason })?;
        Ok(Arc::new(ResolvedFilter {
            plugin: Arc::clone(&filter.plugin),
            plugin_name: plugin_name.clone(),
            config: Arc::new(config),
        }))
    }
}

fn config_layer(entry: Option<&RouterPlugin>) -> Option<&TypedStruct> {
    match entry {
        Some(RouterPlugin::Config(config)) => Some(config),
        _ => None,
    }
}

/// Applies route updates to every connection manager that uses the updated route configuration.
pub struct RoutesManager {
    managers: Vec<Arc<ConnectionManager>>,
}

impl RoutesManager {
    pub fn new(managers: Vec<Arc<ConnectionManager>>) -> Self {
        Self { managers }
    }

    /// Returns how many connection managers took the change. An `Added` change that fails to build for any of
    /// them is applied to none.
    pub fn apply(&self, change: RouteConfigurationChange) -> Result<usize, ConfigError> {
        match change {
            RouteConfigurationChange::Added((id, route)) => {
                let tables = self
                    .managers
                    .iter()
                    .filter(|m| m.route_config_name() == id)
                    .map(|m| m.compile(&route).map(|table| (m, table)))
                    .collect::<Result<Vec<_>, ConfigError>>()?;
                for (manager, table) in &tables {
                    manager.publish(Arc::clone(table));
                }
                if tables.is_empty() {
                    debug!(target: "dso::routes", %id, "route update matches no connection manager");
                }
                Ok(tables.len())
            },
            RouteConfigurationChange::Removed(id) => {
                let mut removed = 0;
                for manager in self.managers.iter().filter(|m| m.route_config_name() == id) {
                    manager.remove_route();
                    removed += 1;
                }
                Ok(removed)
            },
        }
    }

    pub async fn start(self, mut updates: mpsc::Receiver<RouteConfigurationChange>) {
        while let Some(change) = updates.recv().await {
            if let Err(e) = self.apply(change) {
                warn!(target: "dso::routes", "route update rejected, keeping previous configuration: {e}");
            }
        }
        debug!(target: "dso::routes", "route update channel closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{EntryPoints, PluginDescriptor};

    fn table(yaml: &str) -> Arc<RouteTable> {
        let config: ConnectionManagerConfig = serde_yaml::from_str(yaml).unwrap();
        let manager = ConnectionManager::build(&config, &PluginRegistry::default()).unwrap();
        manager.routes().unwrap()
    }

    const HOSTS: &str = r#"
name: ingress
route_config:
  name: hosts
  virtual_hosts:
    - name: fallback
      domains: ["*"]
      routes: [{ name: fallback, match: { prefix: "/" } }]
    - name: exact
      domains: ["api.example.com"]
      routes: [{ name: exact, match: { prefix: "/" } }]
    - name: suffix
      domains: ["*.example.com"]
      routes: [{ name: suffix, match: { prefix: "/" } }]
    - name: prefix
      domains: ["api.*"]
      routes: [{ name: prefix, match: { prefix: "/" } }]
"#;

    fn route_name(table: &RouteTable, authority: &str) -> Option<CompactString> {
        table.find(authority, "/").and_then(|m| m.name.clone())
    }

    #[test]
    fn domain_precedence() {
        let table = table(HOSTS);
        assert_eq!(route_name(&table, "api.example.com").as_deref(), Some("exact"));
        assert_eq!(route_name(&table, "API.Example.com:8080").as_deref(), Some("exact"));
        assert_eq!(route_name(&table, "www.example.com").as_deref(), Some("suffix"));
        assert_eq!(route_name(&table, "api.internal").as_deref(), Some("prefix"));
        assert_eq!(route_name(&table, "localhost").as_deref(), Some("fallback"));
    }

    #[test]
    fn paths_match_in_order() {
        let table = table(
            r#"
name: ingress
route_config:
  name: paths
  virtual_hosts:
    - name: any
      domains: ["*"]
      routes:
        - { name: exact, match: { path: "/test" } }
        - { name: prefix, match: { prefix: "/test" } }
"#,
        );
        assert_eq!(table.find("host", "/test?async").and_then(|m| m.name.clone()).as_deref(), Some("exact"));
        assert_eq!(table.find("host", "/testing").and_then(|m| m.name.clone()).as_deref(), Some("prefix"));
        assert!(table.find("host", "/other").is_none());
    }

    #[test]
    fn unknown_library_is_rejected() {
        let config: ConnectionManagerConfig = serde_yaml::from_str(
            r#"
name: ingress
http_filters:
  - name: dso
    filter_type: dso
    filter_settings: { library_id: missing, plugin_name: basic }
rds: { route_config_name: remote }
"#,
        )
        .unwrap();
        let err = ConnectionManager::build(&config, &PluginRegistry::default()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownLibrary { ref library_id, .. } if library_id == "missing"));

        let registry = PluginRegistry::default();
        let entry_points =
            EntryPoints { decode_headers: Some(|_| crate::filter::PhaseStatus::Continue), ..Default::default() };
        registry.register(PluginDescriptor::new_static("missing", entry_points)).unwrap();
        let manager = ConnectionManager::build(&config, &registry).unwrap();
        assert_eq!(manager.route_config_name(), "remote");
        assert!(manager.routes().is_none());
    }
}
