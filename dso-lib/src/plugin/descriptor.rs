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
use libloading::Library;
use std::{
    fmt,
    path::{Path, PathBuf},
};

use super::{
    DestroyFn, ExportedDestroyFn, ExportedPhaseFn, ExportedValidateConfigFn, Guarded, JsonMap, PhaseFn,
    ValidateConfigFn,
};
use crate::{
    filter::{DestroyContext, Direction, Phase, PhaseContext, PhaseStatus},
    isolation::call_plugin,
};

/// Handlers of a plugin linked into the host. An absent phase entry point means an implicit `Continue`.
#[derive(Clone, Copy, Default)]
pub struct EntryPoints {
    pub decode_headers: Option<PhaseFn>,
    pub decode_data: Option<PhaseFn>,
    pub decode_trailers: Option<PhaseFn>,
    pub encode_headers: Option<PhaseFn>,
    pub encode_data: Option<PhaseFn>,
    pub encode_trailers: Option<PhaseFn>,
    pub on_destroy: Option<DestroyFn>,
    pub validate_config: Option<ValidateConfigFn>,
}

impl EntryPoints {
    pub fn phase(&self, phase: Phase) -> Option<PhaseFn> {
        match phase {
            Phase::DecodeHeaders => self.decode_headers,
            Phase::DecodeData => self.decode_data,
            Phase::DecodeTrailers => self.decode_trailers,
            Phase::EncodeHeaders => self.encode_headers,
            Phase::EncodeData => self.encode_data,
            Phase::EncodeTrailers => self.encode_trailers,
            Phase::AwaitingUpstream | Phase::Done => None,
        }
    }
}

/// Symbols resolved from a loaded module. Each one catches its own panics.
#[derive(Clone, Copy, Default)]
pub struct ExportedEntryPoints {
    pub decode_headers: Option<ExportedPhaseFn>,
    pub decode_data: Option<ExportedPhaseFn>,
    pub decode_trailers: Option<ExportedPhaseFn>,
    pub encode_headers: Option<ExportedPhaseFn>,
    pub encode_data: Option<ExportedPhaseFn>,
    pub encode_trailers: Option<ExportedPhaseFn>,
    pub on_destroy: Option<ExportedDestroyFn>,
    pub validate_config: Option<ExportedValidateConfigFn>,
}

impl ExportedEntryPoints {
    pub fn phase(&self, phase: Phase) -> Option<ExportedPhaseFn> {
        match phase {
            Phase::DecodeHeaders => self.decode_headers,
            Phase::DecodeData => self.decode_data,
            Phase::DecodeTrailers => self.decode_trailers,
            Phase::EncodeHeaders => self.encode_headers,
            Phase::EncodeData => self.encode_data,
            Phase::EncodeTrailers => self.encode_trailers,
            Phase::AwaitingUpstream | Phase::Done => None,
        }
    }

    pub fn has_phases(&self) -> bool {
        [
            self.decode_headers,
            self.decode_data,
            self.decode_trailers,
            self.encode_headers,
            self.encode_data,
            self.encode_trailers,
        ]
        .iter()
        .any(Option::is_some)
    }
}

macro_rules! debug_entry_points {
    ($ty:ident) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($ty))
                    .field("decode_headers", &self.decode_headers.is_some())
                    .field("decode_data", &self.decode_data.is_some())
                    .field("decode_trailers", &self.decode_trailers.is_some())
                    .field("encode_headers", &self.encode_headers.is_some())
                    .field("encode_data", &self.encode_data.is_some())
                    .field("encode_trailers", &self.encode_trailers.is_some())
                    .field("on_destroy", &self.on_destroy.is_some())
                    .field("validate_config", &self.validate_config.is_some())
                    .finish()
            }
        }
    };
}

debug_entry_points!(EntryPoints);
debug_entry_points!(ExportedEntryPoints);

enum Handlers {
    Linked(EntryPoints),
    Loaded {
        entry_points: ExportedEntryPoints,
        // the symbols point into this library, it must outlive every call through them
        _library: Library,
    },
}

/// A plugin, linked in or loaded from a module. Immutable once built.
pub struct PluginDescriptor {
    id: CompactString,
    path: Option<PathBuf>,
    handlers: Handlers,
}

impl PluginDescriptor {
    /// Descriptor for a plugin linked into the host binary.
    pub fn new_static(id: impl Into<CompactString>, entry_points: EntryPoints) -> Self {
        Self { id: id.into(), path: None, handlers: Handlers::Linked(entry_points) }
    }

    pub(crate) fn from_library(
        id: CompactString,
        path: PathBuf,
        entry_points: ExportedEntryPoints,
        library: Library,
    ) -> Self {
        Self { id, path: Some(path), handlers: Handlers::Loaded { entry_points, _library: library } }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.handlers, Handlers::Loaded { .. })
    }

    pub fn has_phase(&self, phase: Phase) -> bool {
        match &self.handlers {
            Handlers::Linked(entry_points) => entry_points.phase(phase).is_some(),
            Handlers::Loaded { entry_points, .. } => entry_points.phase(phase).is_some(),
        }
    }

    pub fn handles_data(&self, direction: Direction) -> bool {
        self.has_phase(Phase::data_of(direction))
    }

    /// Runs the entry point of `phase`. A missing one continues; a panic comes back as its message.
    pub(crate) fn call_phase(&self, phase: Phase, ctx: &mut PhaseContext<'_>) -> Guarded<PhaseStatus> {
        match &self.handlers {
            Handlers::Linked(entry_points) => match entry_points.phase(phase) {
                Some(handler) => call_plugin(|| handler(ctx)),
                None => Ok(PhaseStatus::Continue),
            },
            Handlers::Loaded { entry_points, .. } => match entry_points.phase(phase) {
                Some(symbol) => symbol(ctx),
                None => Ok(PhaseStatus::Continue),
            },
        }
    }

    pub(crate) fn call_on_destroy(&self, ctx: &mut DestroyContext<'_>) -> Guarded<()> {
        match &self.handlers {
            Handlers::Linked(EntryPoints { on_destroy: Some(handler), .. }) => call_plugin(|| handler(ctx)),
            Handlers::Loaded { entry_points: ExportedEntryPoints { on_destroy: Some(symbol), .. }, .. } => symbol(ctx),
            _ => Ok(()),
        }
    }

    /// Asks the plugin whether it accepts a resolved configuration. Plugins without a validator accept anything.
    pub(crate) fn call_validate_config(&self, plugin_name: &str, config: &JsonMap) -> Guarded<Result<(), String>> {
        match &self.handlers {
            Handlers::Linked(EntryPoints { validate_config: Some(handler), .. }) => {
                call_plugin(|| handler(plugin_name, config))
            },
            Handlers::Loaded { entry_points: ExportedEntryPoints { validate_config: Some(symbol), .. }, .. } => {
                symbol(plugin_name, config)
            },
            _ => Ok(Ok(())),
        }
    }
}

impl fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("PluginDescriptor");
        debug.field("id", &self.id).field("path", &self.path);
        match &self.handlers {
            Handlers::Linked(entry_points) => debug.field("entry_points", entry_points),
            Handlers::Loaded { entry_points, .. } => debug.field("entry_points", entry_points),
        };
        debug.finish_non_exhaustive()
    }
}
