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
use dso_configuration::config::{bootstrap::DsoLibrary, Bootstrap};
use libloading::Library;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

use super::{
    symbols, AbiVersionFn, ExportedDestroyFn, ExportedEntryPoints, ExportedPhaseFn, ExportedValidateConfigFn,
    PluginDescriptor, PluginRegistry, DSO_ABI_VERSION,
};

/// Failure to bring a plugin module up. Always fatal at startup.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to open dso `{so_id}` at {}: {source}", .path.display())]
    Open {
        so_id: CompactString,
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
    #[error("dso `{so_id}` does not export required symbol `{symbol}`")]
    MissingSymbol { so_id: CompactString, symbol: &'static str },
    #[error("dso `{so_id}` was built for abi version {found}, host expects {expected}")]
    AbiMismatch { so_id: CompactString, expected: u32, found: u32 },
    #[error("dso `{0}` exports no filter entry points")]
    NoEntryPoints(CompactString),
    #[error("dso `{0}` is already loaded")]
    Duplicate(CompactString),
}

pub struct PluginLoader;

impl PluginLoader {
    /// Opens the module named by the directive and resolves its entry points once.
    pub fn load(directive: &DsoLibrary) -> Result<PluginDescriptor, LoadError> {
        let so_id = directive.so_id.clone();
        let path = directive.so_path.clone();
        info!(target: "dso::plugin", %so_id, path = %path.display(), "loading dso");

        // SAFETY: the module runs its initializers on load. Modules are trusted artifacts built against this crate,
        // which is what `dso_abi_version` checks below.
        let library = unsafe { Library::new(&path) }
            .map_err(|source| LoadError::Open { so_id: so_id.clone(), path: path.clone(), source })?;

        // SAFETY: the symbol types are the ones `declare_dso_filter!` exports them with.
        let entry_points = unsafe {
            let abi_version: AbiVersionFn = *library
                .get::<AbiVersionFn>(symbols::ABI_VERSION)
                .map_err(|_| LoadError::MissingSymbol { so_id: so_id.clone(), symbol: "dso_abi_version" })?;
            let found = abi_version();
            if found != DSO_ABI_VERSION {
                return Err(LoadError::AbiMismatch { so_id, expected: DSO_ABI_VERSION, found });
            }
            ExportedEntryPoints {
                decode_headers: optional::<ExportedPhaseFn>(&library, symbols::DECODE_HEADERS),
                decode_data: optional::<ExportedPhaseFn>(&library, symbols::DECODE_DATA),
                decode_trailers: optional::<ExportedPhaseFn>(&library, symbols::DECODE_TRAILERS),
                encode_headers: optional::<ExportedPhaseFn>(&library, symbols::ENCODE_HEADERS),
                encode_data: optional::<ExportedPhaseFn>(&library, symbols::ENCODE_DATA),
                encode_trailers: optional::<ExportedPhaseFn>(&library, symbols::ENCODE_TRAILERS),
                on_destroy: optional::<ExportedDestroyFn>(&library, symbols::ON_DESTROY),
                validate_config: optional::<ExportedValidateConfigFn>(&library, symbols::VALIDATE_CONFIG),
            }
        };
        if !entry_points.has_phases() {
            return Err(LoadError::NoEntryPoints(so_id));
        }
        debug!(target: "dso::plugin", %so_id, ?entry_points, "dso entry points resolved");
        Ok(PluginDescriptor::from_library(so_id, path, entry_points, library))
    }

    /// Loads every `dso` bootstrap extension into a fresh registry. The first failure aborts.
    pub fn load_all(bootstrap: &Bootstrap) -> Result<PluginRegistry, LoadError> {
        let registry = PluginRegistry::default();
        for directive in bootstrap.dso_libraries() {
            registry.register(Self::load(directive)?)?;
        }
        Ok(registry)
    }
}

unsafe fn optional<T: Copy>(library: &Library, symbol: &[u8]) -> Option<T> {
    library.get::<T>(symbol).ok().map(|s| *s)
}
