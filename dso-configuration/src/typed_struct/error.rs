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

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedStructError {
    /// `@type` names something other than a TypedStruct wrapper
    UnexpectedWrapper(String),
    /// `value` is present but is not a map
    ValueNotAMap(&'static str),
}

impl fmt::Display for TypedStructError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedWrapper(url) => {
                write!(f, "expected a TypedStruct wrapper but @type is '{url}'")
            },
            Self::ValueNotAMap(kind) => write!(f, "TypedStruct value must be a map, found {kind}"),
        }
    }
}

impl std::error::Error for TypedStructError {}
