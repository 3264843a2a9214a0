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

use arc_swap::ArcSwap;
use compact_str::CompactString;
use std::{collections::HashMap, sync::Arc};
use tracing::info;

use super::{LoadError, PluginDescriptor};

type Plugins = HashMap<CompactString, Arc<PluginDescriptor>>;

/// Loaded plugin modules by `so_id`. Readers never lock; registering publishes a new snapshot.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    plugins: ArcSwap<Plugins>,
}

impl PluginRegistry {
    pub fn register(&self, descriptor: PluginDescriptor) -> Result<Arc<PluginDescriptor>, LoadError> {
        let id = CompactString::from(descriptor.id());
        if self.plugins.load().contains_key(&id) {
            return Err(LoadError::Duplicate(id));
        }
        let descriptor = Arc::new(descriptor);
        self.plugins.rcu(|current| {
            let mut next = Plugins::clone(current);
            next.insert(id.clone(), Arc::clone(&descriptor));
            next
        });
        info!(target: "dso::plugin", so_id = %id, "dso registered");
        Ok(descriptor)
    }

    pub fn get(&self, so_id: &str) -> Option<Arc<PluginDescriptor>> {
        self.plugins.load().get(so_id).cloned()
    }

    pub fn snapshot(&self) -> Arc<Plugins> {
        self.plugins.load_full()
    }

    pub fn len(&self) -> usize {
        self.plugins.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.load().is_empty()
    }
}
