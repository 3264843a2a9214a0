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

use compact_str::CompactString;
use dso_configuration::{
    config::dso_filter::MergePolicy,
    typed_struct::{JsonMap, TypedStruct},
    ConfigError,
};

/// Plugin configuration a stream runs with. Resolved once per route snapshot and shared by its streams.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectiveConfig {
    type_url: CompactString,
    values: JsonMap,
}

impl EffectiveConfig {
    pub fn new(type_url: impl Into<CompactString>, values: JsonMap) -> Self {
        Self { type_url: type_url.into(), values }
    }

    pub fn type_url(&self) -> &str {
        &self.type_url
    }

    pub fn values(&self) -> &JsonMap {
        &self.values
    }
}

/// The three configuration layers that apply to one route, least specific first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteFilterConfig {
    pub policy: MergePolicy,
    pub filter: Option<TypedStruct>,
    pub virtual_host: Option<TypedStruct>,
    pub route: Option<TypedStruct>,
}

impl RouteFilterConfig {
    pub fn resolve(&self, plugin_name: &str) -> Result<EffectiveConfig, ConfigError> {
        let type_url = self.type_url(plugin_name)?;
        let values = match self.policy {
            MergePolicy::Override => self.most_specific().map(|layer| layer.value.clone()).unwrap_or_default(),
            MergePolicy::MergeVirtualhostRouterFilter => {
                union([self.filter.as_ref(), self.virtual_host.as_ref(), self.route.as_ref()])
            },
            MergePolicy::MergeVirtualhostRouter => {
                if self.virtual_host.is_none() && self.route.is_none() {
                    self.filter.as_ref().map(|layer| layer.value.clone()).unwrap_or_default()
                } else {
                    union([self.virtual_host.as_ref(), self.route.as_ref()])
                }
            },
        };
        Ok(EffectiveConfig { type_url, values })
    }

    fn most_specific(&self) -> Option<&TypedStruct> {
        self.route.as_ref().or(self.virtual_host.as_ref()).or(self.filter.as_ref())
    }

    /// Layers may leave the type url out; the ones that name it must agree.
    fn type_url(&self, plugin_name: &str) -> Result<CompactString, ConfigError> {
        let layers = [("filter", &self.filter), ("virtual host", &self.virtual_host), ("route", &self.route)];
        let mut declared: Option<&CompactString> = None;
        for (scope, layer) in layers {
            let Some(url) = layer.as_ref().map(|l| &l.type_url).filter(|url| !url.is_empty()) else {
                continue;
            };
            match declared {
                Some(expected) if expected != url => {
                    return Err(ConfigError::ConflictingTypeUrl {
                        plugin: plugin_name.into(),
                        scope,
                        expected: expected.clone(),
                        found: url.clone(),
                    });
                },
                Some(_) => {},
                None => declared = Some(url),
            }
        }
        Ok(declared.cloned().unwrap_or_default())
    }
}

/// Shallow key union; later layers win on conflicting keys.
fn union<'a>(layers: impl IntoIterator<Item = Option<&'a TypedStruct>>) -> JsonMap {
    let mut merged = JsonMap::new();
    for layer in layers.into_iter().flatten() {
        for (key, value) in &layer.value {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn layer(value: serde_json::Value) -> Option<TypedStruct> {
        let serde_json::Value::Object(map) = value else { panic!("layer must be an object") };
        Some(TypedStruct::new("typexx", map))
    }

    fn config(policy: MergePolicy) -> RouteFilterConfig {
        RouteFilterConfig {
            policy,
            filter: layer(json!({"key": "value", "int": 10})),
            virtual_host: layer(json!({"foo": "bar"})),
            route: layer(json!({"baz": "bat"})),
        }
    }

    #[test]
    fn merge_keeps_every_layer() {
        let resolved = config(MergePolicy::MergeVirtualhostRouterFilter).resolve("basic").unwrap();
        assert_eq!(
            serde_json::Value::Object(resolved.values().clone()),
            json!({"key": "value", "int": 10, "foo": "bar", "baz": "bat"})
        );
        assert_eq!(resolved.type_url(), "typexx");
    }

    #[test]
    fn merge_prefers_more_specific_keys() {
        let mut layers = config(MergePolicy::MergeVirtualhostRouterFilter);
        layers.virtual_host = layer(json!({"foo": "bar", "key": "vhost"}));
        layers.route = layer(json!({"foo": "route"}));
        let resolved = layers.resolve("basic").unwrap();
        assert_eq!(resolved.values()["foo"], json!("route"));
        assert_eq!(resolved.values()["key"], json!("vhost"));
        assert_eq!(resolved.values()["int"], json!(10));
    }

    #[test]
    fn override_takes_most_specific_layer() {
        let resolved = config(MergePolicy::Override).resolve("basic").unwrap();
        assert_eq!(serde_json::Value::Object(resolved.values().clone()), json!({"baz": "bat"}));

        let mut layers = config(MergePolicy::Override);
        layers.route = None;
        let resolved = layers.resolve("basic").unwrap();
        assert_eq!(serde_json::Value::Object(resolved.values().clone()), json!({"foo": "bar"}));

        layers.virtual_host = None;
        let resolved = layers.resolve("basic").unwrap();
        assert_eq!(resolved.values()["int"], json!(10));
    }

    #[test]
    fn merge_without_filter_layer() {
        let resolved = config(MergePolicy::MergeVirtualhostRouter).resolve("basic").unwrap();
        assert_eq!(serde_json::Value::Object(resolved.values().clone()), json!({"foo": "bar", "baz": "bat"}));

        let only_filter = RouteFilterConfig {
            policy: MergePolicy::MergeVirtualhostRouter,
            filter: layer(json!({"key": "value"})),
            ..Default::default()
        };
        assert_eq!(only_filter.resolve("basic").unwrap().values()["key"], json!("value"));
    }

    #[test]
    fn no_layers_is_empty() {
        let resolved = RouteFilterConfig::default().resolve("basic").unwrap();
        assert!(resolved.values().is_empty());
        assert_eq!(resolved.type_url(), "");
    }

    #[test]
    fn conflicting_type_urls_rejected() {
        let mut layers = config(MergePolicy::MergeVirtualhostRouterFilter);
        layers.route.as_mut().unwrap().type_url = "other".into();
        let err = layers.resolve("basic").unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingTypeUrl { scope: "route", .. }));

        let mut layers = config(MergePolicy::Override);
        layers.filter.as_mut().unwrap().type_url = CompactString::default();
        assert!(layers.resolve("basic").is_ok());
    }
}
