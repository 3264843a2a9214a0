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

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct HostStats {
    streams_created: AtomicU64,
    streams_destroyed: AtomicU64,
    plugin_faults: AtomicU64,
    local_replies: AtomicU64,
    resumptions: AtomicU64,
    stale_continuations: AtomicU64,
    double_resumes: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub streams_created: u64,
    pub streams_destroyed: u64,
    pub plugin_faults: u64,
    pub local_replies: u64,
    pub resumptions: u64,
    pub stale_continuations: u64,
    pub double_resumes: u64,
}

macro_rules! counter {
    ($($name:ident => $field:ident),* $(,)?) => {
        impl HostStats {
            $(
                pub(crate) fn $name(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*

            pub fn snapshot(&self) -> StatsSnapshot {
                StatsSnapshot { $($field: self.$field.load(Ordering::Relaxed)),* }
            }
        }
    };
}

counter! {
    stream_created => streams_created,
    stream_destroyed => streams_destroyed,
    plugin_fault => plugin_faults,
    local_reply => local_replies,
    resumption => resumptions,
    stale_continuation => stale_continuations,
    double_resume => double_resumes,
}
