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

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rill_common::buffer::TupleBuffer;
use rill_common::util::StopToken;

use crate::error::StreamError;
use crate::executor::{ExecutablePipeline, PipelineExecutionContext, WorkerContext};

const WAIT_SLICE: Duration = Duration::from_millis(50);

/// A compiled pipeline bound to its execution context.
pub struct RunningPipeline {
    pub pipeline: ExecutablePipeline,
    pub ctx: PipelineExecutionContext,
}

impl RunningPipeline {
    pub fn process(
        &self,
        worker: &WorkerContext,
        buffer: &TupleBuffer,
    ) -> crate::error::Result<()> {
        self.pipeline.execute_buffer(worker, &self.ctx, buffer)
    }

    pub fn terminate(&self, worker: &WorkerContext) -> crate::error::Result<()> {
        self.pipeline.terminate(worker, &self.ctx)
    }
}

/// Reports a task failure back to its query.
pub type FailureFn = Arc<dyn Fn(StreamError) + Send + Sync>;

/// One unit of worker work: a buffer to run through a pipeline.
pub struct Task {
    pub pipeline: Arc<RunningPipeline>,
    pub buffer: TupleBuffer,
    pub failure: FailureFn,
}

/// The engine-wide task queue worker threads pull from.
///
/// Tasks of one origin may be processed in arbitrary order across workers;
/// the operators recover ordering through watermarks and sequence numbers.
#[derive(Default)]
pub struct TaskQueue {
    queue: Mutex<VecDeque<Task>>,
    available: Condvar,
    /// Queued plus currently executing tasks.
    in_flight: AtomicUsize,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, task: Task) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        self.queue.lock().push_back(task);
        self.available.notify_one();
    }

    /// Blocks for the next task; returns `None` once cancelled.
    pub fn pop(&self, stop: &StopToken) -> Option<Task> {
        let mut queue = self.queue.lock();
        loop {
            if let Some(task) = queue.pop_front() {
                return Some(task);
            }
            if stop.is_stop_requested() {
                return None;
            }
            self.available.wait_for(&mut queue, WAIT_SLICE);
        }
    }

    /// Workers call this after finishing a popped task.
    pub fn task_done(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Waits until no task is queued or executing. Returns `false` on
    /// timeout.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.in_flight() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use rill_common::util::StopSource;

    use super::*;

    #[test]
    fn pop_is_cancellable() {
        let queue = TaskQueue::new();
        let stop = StopSource::new();
        stop.request_stop();
        assert!(queue.pop(&stop.token()).is_none());
    }

    #[test]
    fn idle_tracking_counts_executing_tasks() {
        let queue = Arc::new(TaskQueue::new());
        assert!(queue.wait_until_idle(Duration::from_millis(10)));

        // Simulate a pushed task that nobody finishes yet.
        queue.in_flight.fetch_add(1, Ordering::AcqRel);
        assert!(!queue.wait_until_idle(Duration::from_millis(20)));
        queue.task_done();
        assert!(queue.wait_until_idle(Duration::from_millis(10)));
    }
}
