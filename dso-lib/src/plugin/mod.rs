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

//! Plugin modules and their entry points.
//!
//! A plugin module is a `cdylib` built against this crate that exports `dso_abi_version` and any subset of the
//! phase entry points, usually through [`declare_dso_filter!`](crate::declare_dso_filter). Exported entry points use
//! the C calling convention but pass Rust types, so a module must be built with the same toolchain and the same
//! version of this crate as the host; `dso_abi_version` guards against the latter.

mod descriptor;
mod loader;
mod registry;

pub use descriptor::{EntryPoints, ExportedEntryPoints, PluginDescriptor};
pub use loader::{LoadError, PluginLoader};
pub use registry::PluginRegistry;

use crate::filter::{DestroyContext, PhaseContext, PhaseStatus};
pub use dso_configuration::typed_struct::JsonMap;

pub const DSO_ABI_VERSION: u32 = 2;

/// Handler signatures a plugin is written against.
pub type PhaseFn = fn(&mut PhaseContext<'_>) -> PhaseStatus;
pub type DestroyFn = fn(&mut DestroyContext<'_>);
pub type ValidateConfigFn = fn(plugin_name: &str, config: &JsonMap) -> Result<(), String>;

/// Result of an exported entry point: the handler's value, or the message of the panic that ended it.
pub type Guarded<T> = Result<T, String>;

// Signatures of the symbols `declare_dso_filter!` exports. Both sides are built from this crate at the same
// abi version, so the Rust types passed through them have the same layout on both sides.
pub type AbiVersionFn = extern "C" fn() -> u32;
#[allow(improper_ctypes_definitions)]
pub type ExportedPhaseFn = extern "C" fn(&mut PhaseContext<'_>) -> Guarded<PhaseStatus>;
#[allow(improper_ctypes_definitions)]
pub type ExportedDestroyFn = extern "C" fn(&mut DestroyContext<'_>) -> Guarded<()>;
#[allow(improper_ctypes_definitions)]
pub type ExportedValidateConfigFn = extern "C" fn(&str, &JsonMap) -> Guarded<Result<(), String>>;

pub(crate) mod symbols {
    pub const ABI_VERSION: &[u8] = b"dso_abi_version\0";
    pub const DECODE_HEADERS: &[u8] = b"dso_decode_headers\0";
    pub const DECODE_DATA: &[u8] = b"dso_decode_data\0";
    pub const DECODE_TRAILERS: &[u8] = b"dso_decode_trailers\0";
    pub const ENCODE_HEADERS: &[u8] = b"dso_encode_headers\0";
    pub const ENCODE_DATA: &[u8] = b"dso_encode_data\0";
    pub const ENCODE_TRAILERS: &[u8] = b"dso_encode_trailers\0";
    pub const ON_DESTROY: &[u8] = b"dso_on_destroy\0";
    pub const VALIDATE_CONFIG: &[u8] = b"dso_validate_config\0";
}

/// Exports the entry point symbols of a plugin module.
///
/// Each symbol runs its handler under [`call_plugin`](crate::isolation::call_plugin) on the module side, so a
/// panicking handler reaches the host as a fault of the stream instead of unwinding into it.
///
/// ```ignore
/// dso_lib::declare_dso_filter! {
///     decode_headers => decode_headers,
///     encode_data => encode_data,
/// }
/// ```
#[macro_export]
macro_rules! declare_dso_filter {
    ($($entry:ident => $handler:path),* $(,)?) => {
        #[no_mangle]
        pub extern "C" fn dso_abi_version() -> u32 {
            $crate::plugin::DSO_ABI_VERSION
        }
        $( $crate::__dso_entry_point!($entry, $handler); )*
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __dso_entry_point {
    (decode_headers, $handler:path) => {
        $crate::__dso_phase_symbol!(dso_decode_headers, $handler);
    };
    (decode_data, $handler:path) => {
        $crate::__dso_phase_symbol!(dso_decode_data, $handler);
    };
    (decode_trailers, $handler:path) => {
        $crate::__dso_phase_symbol!(dso_decode_trailers, $handler);
    };
    (encode_headers, $handler:path) => {
        $crate::__dso_phase_symbol!(dso_encode_headers, $handler);
    };
    (encode_data, $handler:path) => {
        $crate::__dso_phase_symbol!(dso_encode_data, $handler);
    };
    (encode_trailers, $handler:path) => {
        $crate::__dso_phase_symbol!(dso_encode_trailers, $handler);
    };
    (on_destroy, $handler:path) => {
        #[no_mangle]
        #[allow(improper_ctypes_definitions)]
        pub extern "C" fn dso_on_destroy(
            ctx: &mut $crate::filter::DestroyContext<'_>,
        ) -> $crate::plugin::Guarded<()> {
            let handler: $crate::plugin::DestroyFn = $handler;
            $crate::isolation::call_plugin(|| handler(ctx))
        }
    };
    (validate_config, $handler:path) => {
        #[no_mangle]
        #[allow(improper_ctypes_definitions)]
        pub extern "C" fn dso_validate_config(
            plugin_name: &str,
            config: &$crate::plugin::JsonMap,
        ) -> $crate::plugin::Guarded<::std::result::Result<(), ::std::string::String>> {
            let handler: $crate::plugin::ValidateConfigFn = $handler;
            $crate::isolation::call_plugin(|| handler(plugin_name, config))
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __dso_phase_symbol {
    ($symbol:ident, $handler:path) => {
        #[no_mangle]
        #[allow(improper_ctypes_definitions)]
        pub extern "C" fn $symbol(
            ctx: &mut $crate::filter::PhaseContext<'_>,
        ) -> $crate::plugin::Guarded<$crate::filter::PhaseStatus> {
            let handler: $crate::plugin::PhaseFn = $handler;
            $crate::isolation::call_plugin(|| handler(ctx))
        }
    };
}
