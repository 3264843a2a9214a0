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

use bytes::Bytes;
use compact_str::CompactString;

use crate::headers::{HeaderError, HeaderMap};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderOp {
    Add(CompactString, CompactString),
    Set(CompactString, CompactString),
    Remove(CompactString),
}

impl HeaderOp {
    pub(crate) fn apply(&self, headers: &mut HeaderMap) -> Result<(), HeaderError> {
        match self {
            HeaderOp::Add(name, value) => headers.add(name.clone(), value.clone()),
            HeaderOp::Set(name, value) => headers.set(name.clone(), value.clone()),
            HeaderOp::Remove(name) => {
                headers.remove(name);
                Ok(())
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeStatus {
    Continue,
    StopAndBuffer,
    StopIteration,
    LocalReply(LocalReply),
    /// The off-loop work failed; the stream is failed like a panic would.
    Fault(CompactString),
}

/// Completion of an asynchronous phase, produced off the event loop and applied on it.
///
/// Header operations target the trailers in a trailers phase and the held headers otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncResult {
    pub status: ResumeStatus,
    pub header_ops: Vec<HeaderOp>,
    pub body: Option<Bytes>,
}

impl AsyncResult {
    pub fn new(status: ResumeStatus) -> Self {
        Self { status, header_ops: Vec::new(), body: None }
    }

    pub fn resume() -> Self {
        Self::new(ResumeStatus::Continue)
    }

    pub fn fault(message: impl Into<CompactString>) -> Self {
        Self::new(ResumeStatus::Fault(message.into()))
    }

    #[must_use]
    pub fn add_header(mut self, name: impl Into<CompactString>, value: impl Into<CompactString>) -> Self {
        self.header_ops.push(HeaderOp::Add(name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn set_header(mut self, name: impl Into<CompactString>, value: impl Into<CompactString>) -> Self {
        self.header_ops.push(HeaderOp::Set(name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn remove_header(mut self, name: impl Into<CompactString>) -> Self {
        self.header_ops.push(HeaderOp::Remove(name.into()));
        self
    }

    #[must_use]
    pub fn replace_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// A response generated by the filter instead of the upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalReply {
    pub status: u16,
    pub headers: Vec<(CompactString, CompactString)>,
    pub body: Bytes,
}

impl LocalReply {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self { status, headers: Vec::new(), body: body.into() }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<CompactString>, value: impl Into<CompactString>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub(crate) fn into_frames(self) -> Result<(HeaderMap, Bytes), HeaderError> {
        let mut headers = HeaderMap::new();
        headers.add(crate::headers::STATUS, self.status.to_string())?;
        for (name, value) in self.headers {
            headers.add(name, value)?;
        }
        headers.set(crate::headers::CONTENT_LENGTH, self.body.len().to_string())?;
        Ok((headers, self.body))
    }
}
