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

//! Per-connection event loop side of the host.
//!
//! A [`Dispatcher`] owns the filter instances of one connection in a generational arena. The pipeline feeds it
//! frames, drains the resulting [`StreamEvent`]s, and hands it the resumptions produced by plugin worker threads.

use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::{
    filter::{
        instance::{FilterInstance, StreamInput},
        DestroyReason, Direction, Phase,
    },
    headers::HeaderMap,
    routes::ConnectionManager,
    scheduler::{ContinuationScheduler, Resumption, StreamId},
    stats::HostStats,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Headers { headers: HeaderMap, end_of_stream: bool },
    Data { data: Bytes, end_of_stream: bool },
    Trailers(HeaderMap),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    PluginFault,
    LocalReplyAfterHeaders,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// towards the upstream
    Upstream(Frame),
    /// towards the client
    Downstream(Frame),
    Reset(ResetReason),
    /// The stream is over; its instance has been destroyed.
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("stream {0} does not exist or has already ended")]
    UnknownStream(StreamId),
    #[error("unexpected {frame} frame on stream {stream}")]
    OutOfOrder { stream: StreamId, frame: &'static str },
    #[error("too many streams on one connection")]
    Capacity,
}

#[derive(Default)]
struct Slot {
    generation: u32,
    instance: Option<FilterInstance>,
}

pub struct Dispatcher {
    manager: Arc<ConnectionManager>,
    stats: Arc<HostStats>,
    scheduler: ContinuationScheduler,
    slots: Vec<Slot>,
    free: Vec<u32>,
    events: Vec<(StreamId, StreamEvent)>,
}

impl Dispatcher {
    pub fn new(manager: Arc<ConnectionManager>, stats: Arc<HostStats>) -> Self {
        let scheduler = ContinuationScheduler::new(Arc::clone(&stats));
        Self { manager, stats, scheduler, slots: Vec::new(), free: Vec::new(), events: Vec::new() }
    }

    /// Starts a stream. The route, and with it the plugin configuration, is fixed from here on.
    pub fn decode_headers(&mut self, headers: HeaderMap, end_of_stream: bool) -> Result<StreamId, StreamError> {
        let route = self.manager.match_stream(&headers);
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let index = u32::try_from(self.slots.len()).map_err(|_| StreamError::Capacity)?;
                self.slots.push(Slot::default());
                index
            },
        };
        let slot = &mut self.slots[index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        let id = StreamId { index, generation: slot.generation };
        slot.instance = Some(FilterInstance::new(id, route));
        self.scheduler.register(id);
        self.stats.stream_created();
        debug!(target: "dso::filter", stream = %id, manager = self.manager.name(), "stream created");

        self.drive(id, StreamInput::Headers(Direction::Request, headers, end_of_stream))?;
        Ok(id)
    }

    pub fn decode_data(&mut self, id: StreamId, data: Bytes, end_of_stream: bool) -> Result<(), StreamError> {
        self.drive(id, StreamInput::Data(Direction::Request, data, end_of_stream))
    }

    pub fn decode_trailers(&mut self, id: StreamId, trailers: HeaderMap) -> Result<(), StreamError> {
        self.drive(id, StreamInput::Trailers(Direction::Request, trailers))
    }

    pub fn encode_headers(&mut self, id: StreamId, headers: HeaderMap, end_of_stream: bool) -> Result<(), StreamError> {
        self.drive(id, StreamInput::Headers(Direction::Response, headers, end_of_stream))
    }

    pub fn encode_data(&mut self, id: StreamId, data: Bytes, end_of_stream: bool) -> Result<(), StreamError> {
        self.drive(id, StreamInput::Data(Direction::Response, data, end_of_stream))
    }

    pub fn encode_trailers(&mut self, id: StreamId, trailers: HeaderMap) -> Result<(), StreamError> {
        self.drive(id, StreamInput::Trailers(Direction::Response, trailers))
    }

    /// The client or the upstream went away.
    pub fn reset_stream(&mut self, id: StreamId) -> Result<(), StreamError> {
        self.instance_mut(id).ok_or(StreamError::UnknownStream(id))?;
        self.release(id, DestroyReason::Reset);
        Ok(())
    }

    /// Waits for the next resumption and applies it. Stays pending while nothing is queued.
    pub async fn process_next_resumption(&mut self) {
        if let Some(resumption) = self.scheduler.recv().await {
            self.apply_resumption(resumption);
        }
    }

    /// Applies every resumption already queued, in arrival order.
    pub fn process_ready_resumptions(&mut self) -> usize {
        let mut applied = 0;
        while let Some(resumption) = self.scheduler.try_recv() {
            self.apply_resumption(resumption);
            applied += 1;
        }
        applied
    }

    pub fn take_events(&mut self) -> Vec<(StreamId, StreamEvent)> {
        std::mem::take(&mut self.events)
    }

    pub fn phase(&self, id: StreamId) -> Option<Phase> {
        self.instance(id).map(FilterInstance::phase)
    }

    pub fn is_suspended(&self, id: StreamId) -> bool {
        self.instance(id).is_some_and(FilterInstance::is_suspended)
    }

    pub fn active_streams(&self) -> usize {
        self.slots.iter().filter(|slot| slot.instance.is_some()).count()
    }

    pub fn stats(&self) -> &Arc<HostStats> {
        &self.stats
    }

    fn apply_resumption(&mut self, resumption: Resumption) {
        let id = resumption.token.stream;
        let Some(slot) = self.slots.get_mut(id.index as usize).filter(|slot| slot.generation == id.generation) else {
            self.stats.stale_continuation();
            return;
        };
        let Some(instance) = slot.instance.as_mut() else {
            self.stats.stale_continuation();
            return;
        };
        instance.resume(resumption, &mut self.scheduler);
        self.collect(id);
    }

    fn drive(&mut self, id: StreamId, input: StreamInput) -> Result<(), StreamError> {
        let slot = self.slots.get_mut(id.index as usize).filter(|slot| slot.generation == id.generation);
        let instance = slot.and_then(|slot| slot.instance.as_mut()).ok_or(StreamError::UnknownStream(id))?;
        let result = instance.handle(input, &mut self.scheduler);
        self.collect(id);
        result
    }

    fn collect(&mut self, id: StreamId) {
        let Some(instance) = self.instance_mut(id) else {
            return;
        };
        let events = instance.take_events();
        let finished = instance.finished();
        self.events.extend(events.into_iter().map(|event| (id, event)));
        if let Some(reason) = finished {
            self.release(id, reason);
        }
    }

    fn release(&mut self, id: StreamId, reason: DestroyReason) {
        // tokens must turn stale before the instance goes away
        self.scheduler.invalidate(id);
        let Some(instance) = self.slots.get_mut(id.index as usize).and_then(|slot| slot.instance.take()) else {
            return;
        };
        instance.destroy(reason);
        self.free.push(id.index);
        self.stats.stream_destroyed();
    }

    fn instance(&self, id: StreamId) -> Option<&FilterInstance> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.instance.as_ref())
    }

    fn instance_mut(&mut self, id: StreamId) -> Option<&mut FilterInstance> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.instance.as_mut())
    }
}
