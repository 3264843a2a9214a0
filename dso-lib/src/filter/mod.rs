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

mod context;
pub(crate) mod instance;
mod outcome;
mod state;

use compact_str::CompactString;
use std::fmt;
use thiserror::Error;

pub use context::{DestroyContext, DestroyReason, PhaseContext};
pub use outcome::{AsyncResult, HeaderOp, LocalReply, ResumeStatus};
pub use state::StreamState;

use crate::{body::BodyError, headers::HeaderError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Request,
    Response,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    DecodeHeaders,
    DecodeData,
    DecodeTrailers,
    AwaitingUpstream,
    EncodeHeaders,
    EncodeData,
    EncodeTrailers,
    Done,
}

impl Phase {
    pub fn direction(self) -> Direction {
        match self {
            Phase::DecodeHeaders | Phase::DecodeData | Phase::DecodeTrailers | Phase::AwaitingUpstream => {
                Direction::Request
            },
            Phase::EncodeHeaders | Phase::EncodeData | Phase::EncodeTrailers | Phase::Done => Direction::Response,
        }
    }

    pub fn is_headers(self) -> bool {
        matches!(self, Phase::DecodeHeaders | Phase::EncodeHeaders)
    }

    pub fn is_trailers(self) -> bool {
        matches!(self, Phase::DecodeTrailers | Phase::EncodeTrailers)
    }

    pub(crate) fn headers_of(direction: Direction) -> Self {
        match direction {
            Direction::Request => Phase::DecodeHeaders,
            Direction::Response => Phase::EncodeHeaders,
        }
    }

    pub(crate) fn data_of(direction: Direction) -> Self {
        match direction {
            Direction::Request => Phase::DecodeData,
            Direction::Response => Phase::EncodeData,
        }
    }

    pub(crate) fn trailers_of(direction: Direction) -> Self {
        match direction {
            Direction::Request => Phase::DecodeTrailers,
            Direction::Response => Phase::EncodeTrailers,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::DecodeHeaders => "decode_headers",
            Phase::DecodeData => "decode_data",
            Phase::DecodeTrailers => "decode_trailers",
            Phase::AwaitingUpstream => "awaiting_upstream",
            Phase::EncodeHeaders => "encode_headers",
            Phase::EncodeData => "encode_data",
            Phase::EncodeTrailers => "encode_trailers",
            Phase::Done => "done",
        };
        f.write_str(name)
    }
}

/// What a plugin entry point asks the host to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseStatus {
    /// Proceed with the (possibly mutated) headers and body.
    Continue,
    /// Hold the output and keep accumulating the body; locks the direction into full buffering.
    StopAndBuffer,
    /// Hold the output until a later phase of the same direction continues.
    StopIteration,
    /// The phase completes later through the continuation obtained with [`PhaseContext::defer`].
    Async,
}

/// Stream scoped failure of a plugin. The stream is answered with a 500 or reset, never the process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginFault {
    #[error("plugin panicked in {phase}: {message}")]
    Panicked { phase: Phase, message: String },
    #[error("plugin returned {status:?} from {phase} at end of stream")]
    StalledAtEndOfStream { phase: Phase, status: PhaseStatus },
    #[error("plugin returned Async from {phase} without deferring")]
    AsyncWithoutContinuation { phase: Phase },
    #[error("plugin reported failure in {phase}: {message}")]
    Reported { phase: Phase, message: CompactString },
    #[error("header mutation in {phase} rejected: {source}")]
    Header { phase: Phase, source: HeaderError },
    #[error("headers of {phase} were already released")]
    HeadersReleased { phase: Phase },
    #[error("body mutation in {phase} rejected: {source}")]
    Body { phase: Phase, source: BodyError },
}
