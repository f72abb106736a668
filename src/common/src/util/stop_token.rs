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

//! Cooperative cancellation for blocking waits.
//!
//! Every suspension point in the engine (pool acquisition, backpressure,
//! source reads, task dequeue) takes a [`StopToken`] and returns promptly
//! once the owning [`StopSource`] requests a stop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The requesting side of a cancellation pair.
#[derive(Clone, Debug, Default)]
pub struct StopSource {
    stopped: Arc<AtomicBool>,
}

impl StopSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn request_stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn token(&self) -> StopToken {
        StopToken {
            stopped: Some(Arc::clone(&self.stopped)),
        }
    }
}

/// The observing side of a cancellation pair. Cheap to clone and pass by
/// reference into blocking calls.
#[derive(Clone, Debug)]
pub struct StopToken {
    stopped: Option<Arc<AtomicBool>>,
}

impl StopToken {
    /// A token that can never be cancelled.
    pub fn never() -> Self {
        Self { stopped: None }
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stopped
            .as_ref()
            .map_or(false, |s| s.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_is_observed_by_all_tokens() {
        let source = StopSource::new();
        let a = source.token();
        let b = source.token();
        assert!(!a.is_stop_requested());

        source.request_stop();
        assert!(a.is_stop_requested());
        assert!(b.is_stop_requested());
        assert!(!StopToken::never().is_stop_requested());
    }
}
