// Copyright 2023 RisingWave Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashMap;

use parking_lot::Mutex;
use rill_common::ids::{OriginId, WorkerThreadId};

/// Tracks, per origin, the watermark each worker thread has last seen.
///
/// The per-origin watermark is the minimum across its workers; the global
/// watermark driving trigger decisions is the minimum across all configured
/// origins. An origin without any update holds everything back at zero.
pub struct WatermarkProcessor {
    origins: Vec<OriginId>,
    seen: Mutex<HashMap<OriginId, HashMap<WorkerThreadId, u64>>>,
}

impl WatermarkProcessor {
    pub fn new(origins: Vec<OriginId>) -> Self {
        debug_assert!(!origins.is_empty(), "a watermark processor needs origins");
        Self {
            origins,
            seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn origins(&self) -> &[OriginId] {
        &self.origins
    }

    /// Called once per input buffer close. Regression per worker is ignored:
    /// watermarks only advance.
    pub fn update_watermark_for_worker(
        &self,
        origin: OriginId,
        worker: WorkerThreadId,
        watermark: u64,
    ) {
        let mut seen = self.seen.lock();
        let per_worker = seen.entry(origin).or_default();
        let entry = per_worker.entry(worker).or_insert(0);
        *entry = (*entry).max(watermark);
    }

    /// The minimum across origins of the minimum across that origin's
    /// workers.
    pub fn global_watermark(&self) -> u64 {
        let seen = self.seen.lock();
        self.origins
            .iter()
            .map(|origin| {
                seen.get(origin)
                    .and_then(|per_worker| per_worker.values().min().copied())
                    .unwrap_or(0)
            })
            .min()
            .unwrap_or(0)
    }
}
