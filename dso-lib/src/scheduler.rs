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

//! Marshals asynchronous phase completions back onto the event loop.
//!
//! Only a [`ContinuationToken`] crosses threads. A worker thread calling [`Continuation::resume`] checks the
//! token against the slot table and, if it is still current, enqueues a [`Resumption`]. Plugin and stream state
//! are touched only when the owning loop drains the queue.
//!
//! `resume` and `suspend` run inside plugin code, which for a loaded module means its own copy of `tracing`
//! without the host's subscriber. They only record; rejected resumptions are logged by the loop when it drains.

use parking_lot::Mutex;
use std::{collections::HashMap, fmt, sync::Arc};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    filter::{AsyncResult, Phase},
    stats::HostStats,
};

/// Generational handle of a stream owned by a [`Dispatcher`](crate::dispatcher::Dispatcher).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContinuationToken {
    pub(crate) stream: StreamId,
    pub(crate) phase: Phase,
    pub(crate) sequence: u64,
}

impl ContinuationToken {
    pub fn stream(&self) -> StreamId {
        self.stream
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }
}

#[derive(Debug)]
pub struct Resumption {
    pub token: ContinuationToken,
    pub result: AsyncResult,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    outstanding: Option<u64>,
    consumed: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Accepted,
    Stale,
    DoubleResume,
}

struct Shared {
    slots: Mutex<HashMap<u32, Slot>>,
    queue: mpsc::UnboundedSender<Resumption>,
    // resumptions turned away since the loop last drained
    rejected: Mutex<Vec<(ContinuationToken, Verdict)>>,
    stats: Arc<HostStats>,
}

impl Shared {
    fn check(&self, token: &ContinuationToken) -> Verdict {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(&token.stream.index) else {
            return Verdict::Stale;
        };
        if slot.generation != token.stream.generation {
            return Verdict::Stale;
        }
        if slot.outstanding == Some(token.sequence) {
            slot.outstanding = None;
            slot.consumed = Some(token.sequence);
            Verdict::Accepted
        } else if slot.consumed == Some(token.sequence) {
            Verdict::DoubleResume
        } else {
            Verdict::Stale
        }
    }
}

/// Loop side of the scheduler. Owned by exactly one dispatcher.
pub struct ContinuationScheduler {
    shared: Arc<Shared>,
    receiver: mpsc::UnboundedReceiver<Resumption>,
    next_sequence: u64,
}

impl ContinuationScheduler {
    pub fn new(stats: Arc<HostStats>) -> Self {
        let (queue, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            slots: Mutex::new(HashMap::new()),
            queue,
            rejected: Mutex::new(Vec::new()),
            stats,
        });
        Self { shared, receiver, next_sequence: 0 }
    }

    pub(crate) fn register(&self, stream: StreamId) {
        self.shared.slots.lock().insert(stream.index, Slot { generation: stream.generation, ..Default::default() });
    }

    /// Parks `phase` of `stream`. A stream has at most one outstanding token, so a new one replaces the old.
    pub fn suspend(&mut self, stream: StreamId, phase: Phase) -> ContinuationToken {
        self.next_sequence += 1;
        let token = ContinuationToken { stream, phase, sequence: self.next_sequence };
        let mut slots = self.shared.slots.lock();
        let slot = slots.entry(stream.index).or_default();
        slot.generation = stream.generation;
        slot.outstanding = Some(token.sequence);
        token
    }

    pub fn continuation(&self, token: ContinuationToken) -> Continuation {
        Continuation { token, shared: Arc::clone(&self.shared) }
    }

    /// Withdraws a token that was handed out but not used to suspend the phase.
    pub(crate) fn cancel(&self, token: &ContinuationToken) {
        if let Some(slot) = self.shared.slots.lock().get_mut(&token.stream.index) {
            if slot.outstanding == Some(token.sequence) {
                slot.outstanding = None;
            }
        }
    }

    /// Must run before the stream's state is released; every token issued for it turns stale.
    pub fn invalidate(&self, stream: StreamId) {
        let removed = self.shared.slots.lock().remove(&stream.index);
        if let Some(Slot { outstanding: Some(sequence), .. }) = removed {
            debug!(target: "dso::scheduler", %stream, sequence, "outstanding continuation invalidated");
        }
    }

    /// Waits for the next resumption. The scheduler keeps its own sender, so this stays pending while the queue
    /// is empty.
    pub async fn recv(&mut self) -> Option<Resumption> {
        self.log_rejected();
        let resumption = self.receiver.recv().await;
        self.log_rejected();
        resumption
    }

    pub fn try_recv(&mut self) -> Option<Resumption> {
        self.log_rejected();
        self.receiver.try_recv().ok()
    }

    fn log_rejected(&self) {
        let rejected = std::mem::take(&mut *self.shared.rejected.lock());
        for (token, verdict) in rejected {
            match verdict {
                Verdict::DoubleResume => warn!(
                    target: "dso::scheduler",
                    stream = %token.stream,
                    phase = %token.phase,
                    "continuation resumed more than once, ignoring"
                ),
                Verdict::Stale | Verdict::Accepted => debug!(
                    target: "dso::scheduler",
                    stream = %token.stream,
                    phase = %token.phase,
                    "stale continuation dropped"
                ),
            }
        }
    }

    pub(crate) fn stats(&self) -> &HostStats {
        &self.shared.stats
    }
}

/// Thread safe handle a plugin uses to complete a suspended phase.
#[derive(Clone)]
pub struct Continuation {
    token: ContinuationToken,
    shared: Arc<Shared>,
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation").field("token", &self.token).finish()
    }
}

impl Continuation {
    pub fn token(&self) -> ContinuationToken {
        self.token
    }

    /// Completes the suspended phase. Callable from any thread.
    ///
    /// A stale token (stream gone, or token withdrawn) is dropped. A second resume of the same token is dropped and
    /// reported as a protocol violation the next time the event loop drains its queue.
    pub fn resume(self, result: AsyncResult) {
        let token = self.token;
        let verdict = self.shared.check(&token);
        if verdict == Verdict::Accepted {
            if self.shared.queue.send(Resumption { token, result }).is_err() {
                // event loop is gone, nothing left to resume
                self.shared.stats.stale_continuation();
            }
            return;
        }
        // recorded before counted, a counter that moved always has its entry waiting
        self.shared.rejected.lock().push((token, verdict));
        if verdict == Verdict::DoubleResume {
            self.shared.stats.double_resume();
        } else {
            self.shared.stats.stale_continuation();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn stream(index: u32, generation: u32) -> StreamId {
        StreamId { index, generation }
    }

    #[test]
    fn resume_enqueues_once() {
        let stats = Arc::new(HostStats::default());
        let mut scheduler = ContinuationScheduler::new(Arc::clone(&stats));
        let id = stream(0, 1);
        scheduler.register(id);
        let token = scheduler.suspend(id, Phase::DecodeHeaders);
        let continuation = scheduler.continuation(token);

        continuation.clone().resume(AsyncResult::resume());
        let resumed = scheduler.try_recv().unwrap();
        assert_eq!(resumed.token, token);

        continuation.resume(AsyncResult::resume());
        assert!(scheduler.try_recv().is_none());
        assert_eq!(stats.snapshot().double_resumes, 1);
    }

    #[traced_test]
    #[test]
    fn double_resume_is_logged() {
        let mut scheduler = ContinuationScheduler::new(Arc::default());
        let id = stream(3, 7);
        scheduler.register(id);
        let token = scheduler.suspend(id, Phase::EncodeData);
        let continuation = scheduler.continuation(token);
        continuation.clone().resume(AsyncResult::resume());
        continuation.resume(AsyncResult::resume());
        assert!(!logs_contain("continuation resumed more than once"));

        // reported by the loop, not by the resuming thread
        assert!(scheduler.try_recv().is_some());
        assert!(logs_contain("continuation resumed more than once"));
        assert!(scheduler.try_recv().is_none());
    }

    #[traced_test]
    #[test]
    fn rejection_from_worker_thread_is_logged_on_drain() {
        let mut scheduler = ContinuationScheduler::new(Arc::default());
        let id = stream(2, 1);
        scheduler.register(id);
        let token = scheduler.suspend(id, Phase::DecodeHeaders);
        let continuation = scheduler.continuation(token);
        scheduler.invalidate(id);
        std::thread::spawn(move || continuation.resume(AsyncResult::resume())).join().unwrap();
        assert!(scheduler.try_recv().is_none());
        assert!(logs_contain("stale continuation dropped"));
    }

    #[test]
    fn invalidated_tokens_are_stale() {
        let stats = Arc::new(HostStats::default());
        let mut scheduler = ContinuationScheduler::new(Arc::clone(&stats));
        let id = stream(0, 1);
        scheduler.register(id);
        let token = scheduler.suspend(id, Phase::DecodeData);
        let continuation = scheduler.continuation(token);
        scheduler.invalidate(id);
        continuation.resume(AsyncResult::resume());
        assert!(scheduler.try_recv().is_none());
        assert_eq!(stats.snapshot().stale_continuations, 1);
        assert_eq!(stats.snapshot().double_resumes, 0);
    }

    #[test]
    fn reused_slot_rejects_old_generation() {
        let stats = Arc::new(HostStats::default());
        let mut scheduler = ContinuationScheduler::new(Arc::clone(&stats));
        let old = stream(0, 1);
        scheduler.register(old);
        let token = scheduler.suspend(old, Phase::DecodeHeaders);
        let continuation = scheduler.continuation(token);
        scheduler.invalidate(old);

        let new = stream(0, 2);
        scheduler.register(new);
        let _current = scheduler.suspend(new, Phase::DecodeHeaders);
        continuation.resume(AsyncResult::resume());
        assert!(scheduler.try_recv().is_none());
        assert_eq!(stats.snapshot().stale_continuations, 1);
    }

    #[test]
    fn cancelled_token_is_stale() {
        let stats = Arc::new(HostStats::default());
        let mut scheduler = ContinuationScheduler::new(Arc::clone(&stats));
        let id = stream(1, 1);
        scheduler.register(id);
        let token = scheduler.suspend(id, Phase::EncodeHeaders);
        scheduler.cancel(&token);
        scheduler.continuation(token).resume(AsyncResult::resume());
        assert!(scheduler.try_recv().is_none());
        assert_eq!(stats.snapshot().stale_continuations, 1);
    }

    #[test]
    fn resume_from_worker_thread() {
        let mut scheduler = ContinuationScheduler::new(Arc::default());
        let id = stream(0, 1);
        scheduler.register(id);
        let token = scheduler.suspend(id, Phase::DecodeData);
        let continuation = scheduler.continuation(token);
        let worker = std::thread::spawn(move || continuation.resume(AsyncResult::resume().replace_body("HELLOWORLD")));
        worker.join().unwrap();
        let resumed = scheduler.try_recv().unwrap();
        assert_eq!(resumed.result.body.as_deref(), Some(&b"HELLOWORLD"[..]));
    }
}
