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

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use crate::headers::{HeaderError, HeaderMap, CONTENT_LENGTH, TRANSFER_ENCODING};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    /// Chunks are forwarded as they are released; headers have already left.
    StreamingThrough,
    /// Chunks accumulate until the end of the stream; headers are held until then.
    FullBuffering,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BodyError {
    #[error("the body is streaming through and can no longer be replaced")]
    StreamingThrough,
    #[error("data received after end of stream")]
    AfterEndOfStream,
}

/// Body of one direction of a stream.
///
/// Holds the bytes received but not yet forwarded. The mode is decided once and then locked for the rest of the
/// direction.
#[derive(Debug, Default)]
pub struct BodyBuffer {
    mode: Option<BodyMode>,
    pending: BytesMut,
    received: usize,
    end_of_stream: bool,
    replaced: bool,
}

impl BodyBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, chunk: &[u8], end_of_stream: bool) -> Result<(), BodyError> {
        if self.end_of_stream {
            return Err(BodyError::AfterEndOfStream);
        }
        self.pending.extend_from_slice(chunk);
        self.received += chunk.len();
        self.end_of_stream = end_of_stream;
        Ok(())
    }

    /// Replaces the buffered body wholesale and locks the direction into full buffering.
    pub fn replace(&mut self, content: impl Into<Bytes>) -> Result<(), BodyError> {
        if self.mode == Some(BodyMode::StreamingThrough) {
            return Err(BodyError::StreamingThrough);
        }
        let content: Bytes = content.into();
        self.pending.clear();
        self.pending.extend_from_slice(&content);
        self.replaced = true;
        self.mode = Some(BodyMode::FullBuffering);
        Ok(())
    }

    /// Locks the mode if it is still undecided and returns the effective one.
    pub fn lock(&mut self, mode: BodyMode) -> BodyMode {
        *self.mode.get_or_insert(mode)
    }

    pub fn mode(&self) -> Option<BodyMode> {
        self.mode
    }

    pub fn contents(&self) -> &[u8] {
        &self.pending
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Total bytes received for this direction, replacements excluded.
    pub fn received(&self) -> usize {
        self.received
    }

    pub fn end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    /// Marks the direction as finished without a data frame, e.g. when trailers arrive.
    pub fn close(&mut self) {
        self.end_of_stream = true;
    }

    pub fn is_replaced(&self) -> bool {
        self.replaced
    }

    /// Hands the pending bytes over for forwarding.
    pub fn take(&mut self) -> Bytes {
        self.pending.split().freeze()
    }

    /// Frames a replaced body by its length, dropping any `transfer-encoding`. Untouched bodies keep the framing
    /// they arrived with.
    pub fn apply_framing(&self, headers: &mut HeaderMap) -> Result<(), HeaderError> {
        if self.replaced {
            headers.remove(TRANSFER_ENCODING);
            headers.set(CONTENT_LENGTH, self.pending.len().to_string())?;
        }
        Ok(())
    }
}
