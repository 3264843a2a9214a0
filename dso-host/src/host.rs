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
use dso_configuration::config::{
    bootstrap::RouteDiscoveryFile, connection_manager::RouteSpecifier, Bootstrap,
};
use dso_error::{Context, Result};
use dso_lib::{
    ConnectionManager, Dispatcher, HostStats, PluginLoader, PluginRegistry, RouteConfigurationChange, RoutesManager,
};
use std::{path::PathBuf, sync::Arc};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::signal::ControlSignal;

#[derive(Debug)]
struct RouteDiscovery {
    path: PathBuf,
    // route configurations that only come from the file
    names: Vec<CompactString>,
}

/// Everything built from a bootstrap: loaded modules, connection managers and their route snapshots.
#[derive(Debug)]
pub struct Host {
    registry: PluginRegistry,
    managers: Vec<Arc<ConnectionManager>>,
    rds: Option<RouteDiscovery>,
    stats: Arc<HostStats>,
}

impl Host {
    /// Loads every dso library named by the bootstrap, then builds the connection managers.
    pub fn build(bootstrap: &Bootstrap) -> Result<Self> {
        let registry = PluginLoader::load_all(bootstrap).context("failed to load dso libraries")?;
        Self::with_registry(bootstrap, registry)
    }

    pub fn with_registry(bootstrap: &Bootstrap, registry: PluginRegistry) -> Result<Self> {
        let managers = bootstrap
            .static_resources
            .connection_managers
            .iter()
            .map(|config| {
                ConnectionManager::build(config, &registry)
                    .map(Arc::new)
                    .with_context_msg(format!("invalid connection manager `{}`", config.name))
            })
            .collect::<Result<Vec<_>>>()?;
        let rds = bootstrap.dynamic_resources.as_ref().map(|dynamic| RouteDiscovery {
            path: dynamic.rds_path.clone(),
            names: bootstrap
                .static_resources
                .connection_managers
                .iter()
                .filter_map(|config| match &config.route_specifier {
                    RouteSpecifier::Rds(rds) => Some(rds.route_config_name.clone()),
                    RouteSpecifier::RouteConfig(_) => None,
                })
                .collect(),
        });
        let host = Self { registry, managers, rds, stats: Arc::default() };

        // at startup an unreadable or rejected route file is fatal, later it only keeps the previous routes
        let routes = RoutesManager::new(host.managers.clone());
        for change in host.route_changes()? {
            routes.apply(change).context("invalid route discovery file")?;
        }
        info!(
            dso_libraries = host.registry.len(),
            connection_managers = host.managers.len(),
            "host configuration loaded"
        );
        Ok(host)
    }

    /// Reads the route discovery file. Route configurations no longer listed in it are removed.
    pub fn route_changes(&self) -> Result<Vec<RouteConfigurationChange>> {
        let Some(rds) = &self.rds else {
            return Ok(Vec::new());
        };
        let file = RouteDiscoveryFile::from_path(&rds.path)
            .with_context_msg(format!("failed to read route discovery file {}", rds.path.display()))?;
        let removed: Vec<_> = rds
            .names
            .iter()
            .filter(|name| !file.resources.iter().any(|route| route.name == **name))
            .map(|name| RouteConfigurationChange::Removed(name.to_string()))
            .collect();
        let mut changes: Vec<_> = file
            .resources
            .into_iter()
            .map(|route| RouteConfigurationChange::Added((route.name.to_string(), route)))
            .collect();
        changes.extend(removed);
        Ok(changes)
    }

    pub fn managers(&self) -> &[Arc<ConnectionManager>] {
        &self.managers
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn stats(&self) -> &Arc<HostStats> {
        &self.stats
    }

    /// A dispatcher for streams of the named connection manager, sharing the host counters.
    pub fn dispatcher(&self, manager: &str) -> Option<Dispatcher> {
        self.managers
            .iter()
            .find(|m| m.name() == manager)
            .map(|m| Dispatcher::new(Arc::clone(m), Arc::clone(&self.stats)))
    }

    /// Runs route updates on a runtime of `num_workers` threads until a shutdown signal arrives.
    pub fn run(self, num_workers: usize, control: broadcast::Receiver<ControlSignal>) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(num_workers)
            .thread_name("dso_worker")
            .enable_all()
            .build()
            .context("failed to build runtime")?;
        runtime.block_on(self.serve(control));
        Ok(())
    }

    pub async fn serve(self, mut control: broadcast::Receiver<ControlSignal>) {
        let (updates_tx, updates_rx) = mpsc::channel(16);
        let routes = RoutesManager::new(self.managers.clone());
        let routes_task = tokio::spawn(routes.start(updates_rx));

        loop {
            match control.recv().await {
                Ok(ControlSignal::ReloadRoutes) => match self.route_changes() {
                    Ok(changes) => {
                        debug!(changes = changes.len(), "reloading routes");
                        for change in changes {
                            if updates_tx.send(change).await.is_err() {
                                warn!("route update task is gone");
                                break;
                            }
                        }
                    },
                    Err(e) => warn!("route reload failed, keeping previous configuration: {e}"),
                },
                Ok(ControlSignal::Shutdown(signal)) => {
                    info!("shutting down on {signal}");
                    break;
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "control signals dropped");
                },
                Err(broadcast::error::RecvError::Closed) => {
                    info!("control channel closed, shutting down");
                    break;
                },
            }
        }

        drop(updates_tx);
        if let Err(e) = routes_task.await {
            warn!("route update task failed: {e}");
        }
        info!(stats = ?self.stats.snapshot(), "host stopped");
    }
}
