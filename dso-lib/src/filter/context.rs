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
use dso_configuration::typed_struct::JsonMap;
use serde_json::Value as JsonValue;
use std::any::Any;

use super::{LocalReply, Phase, StreamState};
use crate::{
    body::{BodyBuffer, BodyError},
    config_merge::EffectiveConfig,
    headers::HeaderMap,
    scheduler::{Continuation, ContinuationScheduler, StreamId},
};

/// Everything a plugin entry point may look at or change during one phase.
pub struct PhaseContext<'a> {
    pub(crate) phase: Phase,
    pub(crate) end_of_stream: bool,
    pub(crate) stream: StreamId,
    pub(crate) plugin_name: &'a str,
    pub(crate) config: &'a EffectiveConfig,
    pub(crate) metadata: Option<&'a JsonValue>,
    pub(crate) headers: Option<&'a mut HeaderMap>,
    pub(crate) trailers: Option<&'a mut HeaderMap>,
    pub(crate) body: &'a mut BodyBuffer,
    pub(crate) state: &'a mut StreamState,
    pub(crate) scheduler: &'a mut ContinuationScheduler,
    pub(crate) continuation: &'a mut Option<Continuation>,
    pub(crate) local_reply: &'a mut Option<LocalReply>,
}

impl PhaseContext<'_> {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Nothing more follows in this direction.
    pub fn end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    pub fn plugin_name(&self) -> &str {
        self.plugin_name
    }

    pub fn config(&self) -> &JsonMap {
        self.config.values()
    }

    pub fn config_value(&self, key: &str) -> Option<&JsonValue> {
        self.config.values().get(key)
    }

    /// `filter_metadata` of the matched route under the dso namespace.
    pub fn route_metadata(&self) -> Option<&JsonValue> {
        self.metadata
    }

    /// Headers of the current direction, as long as they have not been released.
    pub fn headers(&mut self) -> Option<&mut HeaderMap> {
        self.headers.as_deref_mut()
    }

    /// Trailers, only during a trailers phase.
    pub fn trailers(&mut self) -> Option<&mut HeaderMap> {
        self.trailers.as_deref_mut()
    }

    /// Bytes of the current direction received and not yet forwarded.
    pub fn body(&self) -> &[u8] {
        self.body.contents()
    }

    pub fn body_received(&self) -> usize {
        self.body.received()
    }

    /// Replaces the buffered body. The host recomputes `content-length` before the headers leave.
    pub fn replace_body(&mut self, content: impl Into<Bytes>) -> Result<(), BodyError> {
        self.body.replace(content)
    }

    pub fn state<T: Any + Send + Default>(&mut self) -> &mut T {
        self.state.get_or_default()
    }

    pub fn stream_state(&mut self) -> &mut StreamState {
        self.state
    }

    /// Completes the stream with `reply`, whatever status the entry point returns.
    pub fn send_local_reply(&mut self, reply: LocalReply) {
        *self.local_reply = Some(reply);
    }

    /// Hands the phase to another thread. The entry point must then return [`PhaseStatus::Async`] and the phase
    /// resumes when the returned handle is resumed. Calling it twice in one phase returns the same handle.
    ///
    /// [`PhaseStatus::Async`]: super::PhaseStatus::Async
    pub fn defer(&mut self) -> Continuation {
        if let Some(continuation) = self.continuation.as_ref() {
            return continuation.clone();
        }
        let token = self.scheduler.suspend(self.stream, self.phase);
        let continuation = self.scheduler.continuation(token);
        *self.continuation = Some(continuation.clone());
        continuation
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyReason {
    Completed,
    /// reset by the pipeline (client or upstream went away)
    Reset,
    LocalReply,
    Fault,
}

/// Passed to `on_destroy`, right before the stream's state is dropped.
pub struct DestroyContext<'a> {
    pub(crate) plugin_name: &'a str,
    pub(crate) reason: DestroyReason,
    pub(crate) state: &'a mut StreamState,
}

impl DestroyContext<'_> {
    pub fn plugin_name(&self) -> &str {
        self.plugin_name
    }

    pub fn reason(&self) -> DestroyReason {
        self.reason
    }

    pub fn state(&mut self) -> &mut StreamState {
        self.state
    }
}
