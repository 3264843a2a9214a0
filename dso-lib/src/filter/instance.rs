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
use std::{collections::VecDeque, sync::Arc};
use tracing::{debug, error, warn};

use super::{
    AsyncResult, DestroyContext, DestroyReason, Direction, LocalReply, Phase, PhaseContext, PhaseStatus, PluginFault,
    ResumeStatus, StreamState,
};
use crate::{
    body::{BodyBuffer, BodyMode},
    dispatcher::{Frame, ResetReason, StreamError, StreamEvent},
    headers::HeaderMap,
    routes::MatchedRoute,
    scheduler::{ContinuationScheduler, ContinuationToken, Resumption, StreamId},
    stats::HostStats,
};

const FAULT_REPLY_STATUS: u16 = 500;
const FAULT_REPLY_BODY: &str = "plugin fault";

#[derive(Debug)]
pub(crate) enum StreamInput {
    Headers(Direction, HeaderMap, bool),
    Data(Direction, Bytes, bool),
    Trailers(Direction, HeaderMap),
}

impl StreamInput {
    fn direction(&self) -> Direction {
        match self {
            StreamInput::Headers(direction, ..)
            | StreamInput::Data(direction, ..)
            | StreamInput::Trailers(direction, _) => *direction,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Suspension {
    token: ContinuationToken,
    end_of_stream: bool,
}

/// Arrival side bookkeeping, checked when an input is accepted even while the stream is suspended.
#[derive(Debug, Default, Clone, Copy)]
struct Arrivals {
    headers: bool,
    ended: bool,
}

#[derive(Debug, Default)]
struct DirectionState {
    arrivals: Arrivals,
    /// Held headers. `None` once they have been released.
    headers: Option<HeaderMap>,
    body: BodyBuffer,
    trailers: Option<HeaderMap>,
}

/// Per-stream phase state machine around one plugin.
pub(crate) struct FilterInstance {
    id: StreamId,
    route: Arc<MatchedRoute>,
    phase: Phase,
    suspended: Option<Suspension>,
    queued: VecDeque<StreamInput>,
    request: DirectionState,
    response: DirectionState,
    state: StreamState,
    downstream_started: bool,
    finished: Option<DestroyReason>,
    outbox: Vec<StreamEvent>,
}

impl FilterInstance {
    pub(crate) fn new(id: StreamId, route: Arc<MatchedRoute>) -> Self {
        Self {
            id,
            route,
            phase: Phase::DecodeHeaders,
            suspended: None,
            queued: VecDeque::new(),
            request: DirectionState::default(),
            response: DirectionState::default(),
            state: StreamState::default(),
            downstream_started: false,
            finished: None,
            outbox: Vec::new(),
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn is_suspended(&self) -> bool {
        self.suspended.is_some()
    }

    pub(crate) fn finished(&self) -> Option<DestroyReason> {
        self.finished
    }

    pub(crate) fn take_events(&mut self) -> Vec<StreamEvent> {
        std::mem::take(&mut self.outbox)
    }

    /// Accepts a frame from the pipeline. While a phase is suspended the frame is queued and replayed in order.
    pub(crate) fn handle(
        &mut self,
        input: StreamInput,
        scheduler: &mut ContinuationScheduler,
    ) -> Result<(), StreamError> {
        self.check_arrival(&input)?;
        if self.suspended.is_some() {
            debug!(target: "dso::filter", stream = %self.id, phase = %self.phase, "stream suspended, input queued");
            self.queued.push_back(input);
            return Ok(());
        }
        self.dispatch(input, scheduler);
        Ok(())
    }

    /// Applies a drained resumption and re-enters the suspended phase.
    pub(crate) fn resume(&mut self, resumption: Resumption, scheduler: &mut ContinuationScheduler) {
        let Some(suspension) = self.suspended.filter(|s| s.token.sequence == resumption.token.sequence) else {
            scheduler.stats().stale_continuation();
            debug!(target: "dso::filter", stream = %self.id, "resumption does not match the suspended phase, dropped");
            return;
        };
        self.suspended = None;
        scheduler.stats().resumption();
        let phase = suspension.token.phase;
        debug!(target: "dso::filter", stream = %self.id, %phase, "phase resumed");

        let AsyncResult { status, header_ops, body } = resumption.result;
        let ds = self.direction_mut(phase.direction());
        if !header_ops.is_empty() {
            let target = if phase.is_trailers() { ds.trailers.as_mut() } else { ds.headers.as_mut() };
            let Some(headers) = target else {
                return self.fail(PluginFault::HeadersReleased { phase }, scheduler.stats());
            };
            if let Err(source) = header_ops.iter().try_for_each(|op| op.apply(headers)) {
                return self.fail(PluginFault::Header { phase, source }, scheduler.stats());
            }
        }
        if let Some(body) = body {
            if let Err(source) = ds.body.replace(body) {
                return self.fail(PluginFault::Body { phase, source }, scheduler.stats());
            }
        }
        match status {
            ResumeStatus::Continue => {
                self.advance(phase, suspension.end_of_stream, PhaseStatus::Continue, scheduler.stats());
            },
            ResumeStatus::StopAndBuffer => {
                self.advance(phase, suspension.end_of_stream, PhaseStatus::StopAndBuffer, scheduler.stats());
            },
            ResumeStatus::StopIteration => {
                self.advance(phase, suspension.end_of_stream, PhaseStatus::StopIteration, scheduler.stats());
            },
            ResumeStatus::LocalReply(reply) => self.reply_locally(phase, reply, scheduler.stats()),
            ResumeStatus::Fault(message) => self.fail(PluginFault::Reported { phase, message }, scheduler.stats()),
        }
        self.replay(scheduler);
    }

    /// Runs `on_destroy` and drops the stream state. The scheduler slot must already be invalidated.
    pub(crate) fn destroy(mut self, reason: DestroyReason) {
        if let Some(filter) = self.route.filter.as_ref() {
            let mut ctx = DestroyContext { plugin_name: &filter.plugin_name, reason, state: &mut self.state };
            if let Err(message) = filter.plugin.call_on_destroy(&mut ctx) {
                warn!(target: "dso::filter", stream = %self.id, ?reason, "plugin panicked in on_destroy: {message}");
            }
        }
        self.state.clear();
        debug!(target: "dso::filter", stream = %self.id, ?reason, "stream destroyed");
    }

    fn replay(&mut self, scheduler: &mut ContinuationScheduler) {
        while self.suspended.is_none() && self.finished.is_none() {
            let Some(input) = self.queued.pop_front() else {
                break;
            };
            self.dispatch(input, scheduler);
        }
    }

    fn check_arrival(&mut self, input: &StreamInput) -> Result<(), StreamError> {
        let stream = self.id;
        let arrivals = &mut self.direction_mut(input.direction()).arrivals;
        let (frame, valid) = match input {
            StreamInput::Headers(_, _, end_of_stream) => {
                let valid = !arrivals.headers;
                arrivals.headers = true;
                arrivals.ended |= *end_of_stream;
                ("headers", valid)
            },
            StreamInput::Data(_, _, end_of_stream) => {
                let valid = arrivals.headers && !arrivals.ended;
                arrivals.ended |= *end_of_stream;
                ("data", valid)
            },
            StreamInput::Trailers(..) => {
                let valid = arrivals.headers && !arrivals.ended;
                arrivals.ended = true;
                ("trailers", valid)
            },
        };
        if valid {
            Ok(())
        } else {
            Err(StreamError::OutOfOrder { stream, frame })
        }
    }

    fn dispatch(&mut self, input: StreamInput, scheduler: &mut ContinuationScheduler) {
        let (phase, end_of_stream) = match input {
            StreamInput::Headers(direction, headers, end_of_stream) => {
                let ds = self.direction_mut(direction);
                ds.headers = Some(headers);
                if end_of_stream {
                    ds.body.close();
                }
                (Phase::headers_of(direction), end_of_stream)
            },
            StreamInput::Data(direction, data, end_of_stream) => {
                let phase = Phase::data_of(direction);
                if let Err(source) = self.direction_mut(direction).body.append(&data, end_of_stream) {
                    return self.fail(PluginFault::Body { phase, source }, scheduler.stats());
                }
                (phase, end_of_stream)
            },
            StreamInput::Trailers(direction, trailers) => {
                let ds = self.direction_mut(direction);
                ds.trailers = Some(trailers);
                ds.body.close();
                (Phase::trailers_of(direction), true)
            },
        };
        self.phase = phase;
        self.run(phase, end_of_stream, scheduler);
    }

    fn run(&mut self, phase: Phase, end_of_stream: bool, scheduler: &mut ContinuationScheduler) {
        let Some(filter) = self.route.filter.clone() else {
            return self.advance(phase, end_of_stream, PhaseStatus::Continue, scheduler.stats());
        };
        if !filter.plugin.has_phase(phase) {
            return self.advance(phase, end_of_stream, PhaseStatus::Continue, scheduler.stats());
        }

        let mut continuation = None;
        let mut local_reply = None;
        let ds = match phase.direction() {
            Direction::Request => &mut self.request,
            Direction::Response => &mut self.response,
        };
        let result = {
            let mut ctx = PhaseContext {
                phase,
                end_of_stream,
                stream: self.id,
                plugin_name: &filter.plugin_name,
                config: &filter.config,
                metadata: self.route.metadata.as_ref(),
                headers: ds.headers.as_mut(),
                trailers: if phase.is_trailers() { ds.trailers.as_mut() } else { None },
                body: &mut ds.body,
                state: &mut self.state,
                scheduler: &mut *scheduler,
                continuation: &mut continuation,
                local_reply: &mut local_reply,
            };
            filter.plugin.call_phase(phase, &mut ctx)
        };

        let status = match result {
            Ok(status) => status,
            Err(message) => {
                if let Some(continuation) = &continuation {
                    scheduler.cancel(&continuation.token());
                }
                return self.fail(PluginFault::Panicked { phase, message }, scheduler.stats());
            },
        };
        debug!(target: "dso::filter", stream = %self.id, %phase, ?status, end_of_stream, "phase returned");

        if let Some(reply) = local_reply {
            if let Some(continuation) = &continuation {
                scheduler.cancel(&continuation.token());
            }
            return self.reply_locally(phase, reply, scheduler.stats());
        }
        match (status, continuation) {
            (PhaseStatus::Async, Some(continuation)) => {
                let token = continuation.token();
                debug!(
                    target: "dso::scheduler",
                    stream = %self.id,
                    %phase,
                    sequence = token.sequence,
                    "phase suspended"
                );
                self.suspended = Some(Suspension { token, end_of_stream });
            },
            (PhaseStatus::Async, None) => self.fail(PluginFault::AsyncWithoutContinuation { phase }, scheduler.stats()),
            (status, continuation) => {
                if let Some(continuation) = continuation {
                    scheduler.cancel(&continuation.token());
                }
                self.advance(phase, end_of_stream, status, scheduler.stats());
            },
        }
    }

    fn advance(&mut self, phase: Phase, end_of_stream: bool, status: PhaseStatus, stats: &HostStats) {
        let direction = phase.direction();
        match status {
            PhaseStatus::Continue => self.release(phase, end_of_stream),
            PhaseStatus::StopAndBuffer | PhaseStatus::StopIteration if end_of_stream => {
                self.fail(PluginFault::StalledAtEndOfStream { phase, status }, stats);
            },
            PhaseStatus::StopAndBuffer => {
                self.direction_mut(direction).body.lock(BodyMode::FullBuffering);
            },
            PhaseStatus::StopIteration => {},
            PhaseStatus::Async => self.fail(PluginFault::AsyncWithoutContinuation { phase }, stats),
        }
    }

    fn release(&mut self, phase: Phase, end_of_stream: bool) {
        let direction = phase.direction();
        if end_of_stream {
            return self.finalize(direction);
        }
        let handles_data = self.route.filter.as_ref().is_some_and(|f| f.plugin.handles_data(direction));
        let ds = self.direction_mut(direction);
        let mut frames = Vec::new();
        match ds.body.mode() {
            Some(BodyMode::FullBuffering) => {},
            None if phase.is_headers() && handles_data => {},
            Some(BodyMode::StreamingThrough) | None => {
                ds.body.lock(BodyMode::StreamingThrough);
                if let Some(headers) = ds.headers.take() {
                    frames.push(Frame::Headers { headers, end_of_stream: false });
                }
                if !ds.body.is_empty() {
                    frames.push(Frame::Data { data: ds.body.take(), end_of_stream: false });
                }
            },
        }
        self.emit(direction, frames);
    }

    /// Sends everything still held for a direction whose last frame has been processed.
    fn finalize(&mut self, direction: Direction) {
        let ds = self.direction_mut(direction);
        let mut frames = Vec::new();
        let trailers = ds.trailers.take();
        if let Some(mut headers) = ds.headers.take() {
            if let Err(source) = ds.body.apply_framing(&mut headers) {
                let phase = self.phase;
                return self.fail_untracked(PluginFault::Header { phase, source });
            }
            let data = ds.body.take();
            frames.push(Frame::Headers { headers, end_of_stream: data.is_empty() && trailers.is_none() });
            if !data.is_empty() {
                frames.push(Frame::Data { data, end_of_stream: trailers.is_none() });
            }
        } else {
            let data = ds.body.take();
            // a bare end of stream still has to reach the peer
            if !data.is_empty() || trailers.is_none() {
                frames.push(Frame::Data { data, end_of_stream: trailers.is_none() });
            }
        }
        if let Some(trailers) = trailers {
            frames.push(Frame::Trailers(trailers));
        }
        self.emit(direction, frames);

        match direction {
            Direction::Request => {
                if self.phase.direction() == Direction::Request {
                    self.phase = Phase::AwaitingUpstream;
                }
            },
            Direction::Response => {
                self.phase = Phase::Done;
                self.outbox.push(StreamEvent::Complete);
                self.finished = Some(DestroyReason::Completed);
            },
        }
    }

    fn reply_locally(&mut self, phase: Phase, reply: LocalReply, stats: &HostStats) {
        if self.downstream_started {
            warn!(
                target: "dso::filter",
                stream = %self.id,
                %phase,
                "local reply after downstream headers, resetting stream"
            );
            self.outbox.push(StreamEvent::Reset(ResetReason::LocalReplyAfterHeaders));
            self.finished = Some(DestroyReason::LocalReply);
            return;
        }
        let status = reply.status;
        match reply.into_frames() {
            Ok((headers, body)) => {
                stats.local_reply();
                debug!(target: "dso::filter", stream = %self.id, %phase, status, "sending local reply");
                self.send_downstream_reply(headers, body);
                self.finished = Some(DestroyReason::LocalReply);
            },
            Err(source) => self.fail(PluginFault::Header { phase, source }, stats),
        }
    }

    fn fail(&mut self, fault: PluginFault, stats: &HostStats) {
        stats.plugin_fault();
        self.fail_untracked(fault);
    }

    fn fail_untracked(&mut self, fault: PluginFault) {
        error!(target: "dso::filter", stream = %self.id, "{fault}");
        let reply = LocalReply::new(FAULT_REPLY_STATUS, FAULT_REPLY_BODY).into_frames();
        match reply {
            Ok((headers, body)) if !self.downstream_started => self.send_downstream_reply(headers, body),
            _ => self.outbox.push(StreamEvent::Reset(ResetReason::PluginFault)),
        }
        self.queued.clear();
        self.finished = Some(DestroyReason::Fault);
    }

    fn send_downstream_reply(&mut self, headers: HeaderMap, body: Bytes) {
        let mut frames = vec![Frame::Headers { headers, end_of_stream: body.is_empty() }];
        if !body.is_empty() {
            frames.push(Frame::Data { data: body, end_of_stream: true });
        }
        self.emit(Direction::Response, frames);
        self.phase = Phase::Done;
        self.outbox.push(StreamEvent::Complete);
    }

    fn emit(&mut self, direction: Direction, frames: Vec<Frame>) {
        for frame in frames {
            match direction {
                Direction::Request => self.outbox.push(StreamEvent::Upstream(frame)),
                Direction::Response => {
                    self.downstream_started |= matches!(frame, Frame::Headers { .. });
                    self.outbox.push(StreamEvent::Downstream(frame));
                },
            }
        }
    }

    fn direction_mut(&mut self, direction: Direction) -> &mut DirectionState {
        match direction {
            Direction::Request => &mut self.request,
            Direction::Response => &mut self.response,
        }
    }
}
