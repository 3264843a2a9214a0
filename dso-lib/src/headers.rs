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
use thiserror::Error;

pub const CONTENT_LENGTH: &str = "content-length";
pub const TRANSFER_ENCODING: &str = "transfer-encoding";
pub const PATH: &str = ":path";
pub const METHOD: &str = ":method";
pub const AUTHORITY: &str = ":authority";
pub const STATUS: &str = ":status";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    #[error("invalid header name `{0}`")]
    InvalidName(CompactString),
    #[error("invalid value for header `{0}`")]
    InvalidValue(CompactString),
}

/// Ordered multi-value header map.
///
/// Names keep the case they were received or added with, lookups ignore ASCII case. Iteration order is
/// insertion order, so a plugin sees the headers exactly as they arrived.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(CompactString, CompactString)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// All values of `name`, in order.
    pub fn get<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries.iter().filter(move |(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries.iter().filter(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str()).collect()
    }

    pub fn first(&self, name: &str) -> Option<&str> {
        self.entries.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Appends a value, keeping any existing ones.
    pub fn add(&mut self, name: impl Into<CompactString>, value: impl Into<CompactString>) -> Result<(), HeaderError> {
        let (name, value) = validate(name.into(), value.into())?;
        self.entries.push((name, value));
        Ok(())
    }

    /// Replaces every value of `name` with `value`. The header keeps the position of its first occurrence.
    pub fn set(&mut self, name: impl Into<CompactString>, value: impl Into<CompactString>) -> Result<(), HeaderError> {
        let (name, value) = validate(name.into(), value.into())?;
        match self.entries.iter().position(|(k, _)| k.eq_ignore_ascii_case(&name)) {
            Some(first) => {
                let mut index = 0;
                self.entries.retain(|(k, _)| {
                    let keep = index <= first || !k.eq_ignore_ascii_case(&name);
                    index += 1;
                    keep
                });
                self.entries[first] = (name, value);
            },
            None => self.entries.push((name, value)),
        }
        Ok(())
    }

    /// Removes every value of `name`; removing an absent header is a no-op. Returns how many values were dropped.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        before - self.entries.len()
    }

    pub fn path(&self) -> Option<&str> {
        self.first(PATH)
    }

    pub fn authority(&self) -> Option<&str> {
        self.first(AUTHORITY).or_else(|| self.first("host"))
    }

    pub fn status(&self) -> Option<u16> {
        self.first(STATUS).and_then(|s| s.parse().ok())
    }

    pub fn content_length(&self) -> Option<usize> {
        self.first(CONTENT_LENGTH).and_then(|s| s.trim().parse().ok())
    }
}

/// Pseudo headers are checked without their leading `:`.
fn validate(name: CompactString, value: CompactString) -> Result<(CompactString, CompactString), HeaderError> {
    let token = name.strip_prefix(':').unwrap_or(name.as_str());
    if http::HeaderName::from_bytes(token.as_bytes()).is_err() {
        return Err(HeaderError::InvalidName(name));
    }
    if http::HeaderValue::from_bytes(value.as_bytes()).is_err() {
        return Err(HeaderError::InvalidValue(name));
    }
    Ok((name, value))
}

impl<K: Into<CompactString>, V: Into<CompactString>> FromIterator<(K, V)> for HeaderMap {
    /// Builds a map from trusted input; invalid entries are skipped.
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut map = HeaderMap::new();
        for (k, v) in iter {
            let _ = map.add(k, v);
        }
        map
    }
}
