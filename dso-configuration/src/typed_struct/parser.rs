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

use super::{JsonMap, TypedStructError};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Opaque plugin configuration: the inner type url and its top-level keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTypedStruct")]
pub struct TypedStruct {
    #[serde(skip_serializing_if = "CompactString::is_empty")]
    pub type_url: CompactString,
    pub value: JsonMap,
}

impl TypedStruct {
    pub fn new(type_url: impl Into<CompactString>, value: JsonMap) -> Self {
        Self { type_url: type_url.into(), value }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTypedStruct {
    #[serde(rename = "@type", default)]
    wrapper: Option<String>,
    #[serde(default)]
    type_url: CompactString,
    #[serde(default)]
    value: JsonValue,
}

impl TryFrom<RawTypedStruct> for TypedStruct {
    type Error = TypedStructError;

    fn try_from(raw: RawTypedStruct) -> Result<Self, Self::Error> {
        if let Some(wrapper) = raw.wrapper {
            if !TypedStructParser::is_typed_struct_url(&wrapper) {
                return Err(TypedStructError::UnexpectedWrapper(wrapper));
            }
        }
        let value = TypedStructParser::into_map(raw.value)?;
        Ok(Self { type_url: raw.type_url, value })
    }
}

pub struct TypedStructParser;

impl TypedStructParser {
    /// Check if a type URL indicates a TypedStruct wrapper
    pub fn is_typed_struct_url(type_url: &str) -> bool {
        type_url == "type.googleapis.com/udpa.type.v1.TypedStruct"
            || type_url == "type.googleapis.com/xds.type.v3.TypedStruct"
    }

    pub fn into_map(value: JsonValue) -> Result<JsonMap, TypedStructError> {
        match value {
            JsonValue::Object(map) => Ok(map),
            JsonValue::Null => Ok(JsonMap::new()),
            JsonValue::Bool(_) => Err(TypedStructError::ValueNotAMap("a boolean")),
            JsonValue::Number(_) => Err(TypedStructError::ValueNotAMap("a number")),
            JsonValue::String(_) => Err(TypedStructError::ValueNotAMap("a string")),
            JsonValue::Array(_) => Err(TypedStructError::ValueNotAMap("a sequence")),
        }
    }
}
