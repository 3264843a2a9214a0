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

//! Opaque plugin configuration carried as a TypedStruct.
//!
//! Plugin configuration is never interpreted by the host. It arrives wrapped the same way xDS wraps
//! configuration for which no protobuf descriptor is available:
//!
//! ```text
//! plugin_config:
//!   "@type": type.googleapis.com/xds.type.v3.TypedStruct
//!   type_url: type.googleapis.com/example.Config
//!   value:
//!     key: value
//! ```
//!
//! The `"@type"` wrapper is optional; `value` must be a map (or absent, meaning an empty map) since the
//! merge policies operate on top-level keys.

mod error;
mod parser;

pub use error::TypedStructError;
pub use parser::{TypedStruct, TypedStructParser};

pub type JsonMap = serde_json::Map<String, serde_json::Value>;
