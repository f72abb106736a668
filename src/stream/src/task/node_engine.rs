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

//! The per-worker engine: registers subplans, runs their sources and
//! pipelines, and owns the authoritative local query state machine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use rill_common::buffer::BufferManager;
use rill_common::config::RillConfig;
use rill_common::ids::{LocalQueryId, WorkerThreadId};
use rill_common::query::{LocalQueryStatus, QueryMetrics, QueryState};
use rill_common::util::{current_time_millis, StopSource};
use rill_plan::LogicalPlan;

use super::lowering::{Lowering, LoweredQuery};
use super::queue::{Task, TaskQueue};
use crate::error::{Result, StreamError};
use crate::executor::WorkerContext;
use crate::source::{SourceEvent, SourceThread};

/// How long a shutdown waits for the task queue to drain.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

struct QueryEntry {
    id: LocalQueryId,
    /// State and metrics under one lock for consistent snapshots.
    state: RwLock<(QueryState, QueryMetrics)>,
    lowered: Mutex<Option<LoweredQuery>>,
    sources: Mutex<Vec<Arc<SourceThread>>>,
    active_sources: AtomicUsize,
    finalizing: AtomicBool,
}

impl QueryEntry {
    fn new(id: LocalQueryId) -> Self {
        Self {
            id,
            state: RwLock::new((QueryState::Registered, QueryMetrics::default())),
            lowered: Mutex::new(None),
            sources: Mutex::new(vec![]),
            active_sources: AtomicUsize::new(0),
            finalizing: AtomicBool::new(false),
        }
    }

    fn current_state(&self) -> QueryState {
        self.state.read().0
    }

    fn fail(&self, error: &StreamError) {
        let mut state = self.state.write();
        if state.0.is_active() {
            tracing::error!(query_id = %self.id, %error, "query failed");
            state.0 = QueryState::Failed;
            state.1.error = Some(error.to_string());
            state.1.stop = Some(current_time_millis());
        }
    }
}

struct EngineInner {
    buffer_manager: BufferManager,
    config: RillConfig,
    task_queue: Arc<TaskQueue>,
    worker_stop: StopSource,
    worker_handles: Mutex<Vec<std::thread::JoinHandle<()>>>,
    queries: RwLock<HashMap<LocalQueryId, Arc<QueryEntry>>>,
    next_query_id: AtomicU64,
}

/// One worker's execution engine. Cheap to clone; all clones share the same
/// pools, task queue and query table.
#[derive(Clone)]
pub struct NodeEngine {
    inner: Arc<EngineInner>,
}

impl NodeEngine {
    pub fn new(config: RillConfig) -> Result<Self> {
        let buffer_manager = BufferManager::new(
            config.buffer.buffer_size_bytes,
            config.buffer.buffers_in_global_pool,
        )?;
        let inner = Arc::new(EngineInner {
            buffer_manager: buffer_manager.clone(),
            task_queue: Arc::new(TaskQueue::new()),
            worker_stop: StopSource::new(),
            worker_handles: Mutex::new(vec![]),
            queries: RwLock::new(HashMap::new()),
            next_query_id: AtomicU64::new(1),
            config,
        });

        let mut handles = vec![];
        for index in 0..inner.config.runtime.worker_threads.max(1) {
            let worker = WorkerContext::new(
                WorkerThreadId::new(index as u64),
                buffer_manager.clone(),
            );
            let queue = Arc::clone(&inner.task_queue);
            let token = inner.worker_stop.token();
            let handle = std::thread::Builder::new()
                .name(format!("rill-worker-{index}"))
                .spawn(move || {
                    while let Some(task) = queue.pop(&token) {
                        let result = task.pipeline.process(&worker, &task.buffer);
                        queue.task_done();
                        if let Err(e) = result {
                            (task.failure)(e);
                        }
                    }
                })
                .map_err(|e| StreamError::Internal(e.into()))?;
            handles.push(handle);
        }
        *inner.worker_handles.lock() = handles;
        tracing::info!(
            worker_threads = inner.config.runtime.worker_threads,
            "node engine started"
        );
        Ok(Self { inner })
    }

    pub fn buffer_manager(&self) -> &BufferManager {
        &self.inner.buffer_manager
    }

    /// Lowers and registers a subplan; the query stays inert until started.
    pub fn register_query(&self, plan: &LogicalPlan) -> Result<LocalQueryId> {
        let id = LocalQueryId::new(self.inner.next_query_id.fetch_add(1, Ordering::Relaxed));
        let entry = Arc::new(QueryEntry::new(id));

        let failure = {
            let entry = Arc::downgrade(&entry);
            Arc::new(move |error: StreamError| {
                if let Some(entry) = entry.upgrade() {
                    entry.fail(&error);
                }
            }) as super::queue::FailureFn
        };
        let lowered = Lowering::new(
            self.inner.buffer_manager.clone(),
            Arc::clone(&self.inner.task_queue),
            self.inner.config.runtime.worker_threads.max(1),
            failure,
        )
        .lower(plan)?;

        *entry.lowered.lock() = Some(lowered);
        self.inner.queries.write().insert(id, entry);
        tracing::debug!(query_id = %id, "registered query");
        Ok(id)
    }

    fn entry(&self, id: LocalQueryId) -> Result<Arc<QueryEntry>> {
        self.inner
            .queries
            .read()
            .get(&id)
            .cloned()
            .ok_or(StreamError::QueryNotFound(id))
    }

    /// Opens sinks, spawns the source threads and acknowledges the runtime.
    pub fn start(&self, id: LocalQueryId) -> Result<()> {
        let entry = self.entry(id)?;
        {
            let mut state = entry.state.write();
            if state.0 != QueryState::Registered {
                return Err(StreamError::InvalidQueryStateTransition {
                    query_id: id,
                    operation: "start",
                    state: state.0,
                });
            }
            state.0 = QueryState::Started;
            state.1.start = Some(current_time_millis());
        }

        let lowered = entry.lowered.lock();
        let lowered = lowered.as_ref().ok_or(StreamError::QueryNotFound(id))?;
        for handle in &lowered.sinks {
            handle.sink.lock().open()?;
        }

        entry
            .active_sources
            .store(lowered.source_specs.len(), Ordering::Release);
        let mut sources = vec![];
        for spec in &lowered.source_specs {
            let emit = self.make_emit_fn(&entry, spec);
            let num_local_buffers = spec
                .descriptor
                .buffers_in_local_pool
                .unwrap_or(self.inner.config.buffer.buffers_in_source_local_pool);
            let implementation = rill_connector::source::create_source(&spec.descriptor)?;
            let source = Arc::new(SourceThread::new(
                spec.origin,
                self.inner.buffer_manager.clone(),
                num_local_buffers,
                implementation,
                emit,
            ));
            source.start();
            sources.push(source);
        }
        *entry.sources.lock() = sources;

        let mut state = entry.state.write();
        if state.0 == QueryState::Started {
            state.0 = QueryState::Running;
            state.1.running = Some(current_time_millis());
        }
        tracing::debug!(query_id = %id, "query running");
        Ok(())
    }

    fn make_emit_fn(
        &self,
        entry: &Arc<QueryEntry>,
        spec: &super::lowering::SourceSpec,
    ) -> crate::source::EmitFn {
        let target = Arc::clone(&spec.target);
        let queue = Arc::clone(&self.inner.task_queue);
        let weak_entry = Arc::downgrade(entry);
        let weak_inner = Arc::downgrade(&self.inner);
        let failure = {
            let entry = Arc::downgrade(entry);
            Arc::new(move |error: StreamError| {
                if let Some(entry) = entry.upgrade() {
                    entry.fail(&error);
                }
            }) as super::queue::FailureFn
        };
        Arc::new(move |_origin, event| match event {
            SourceEvent::Data(buffer) => queue.push(Task {
                pipeline: Arc::clone(&target),
                buffer,
                failure: Arc::clone(&failure),
            }),
            SourceEvent::EndOfStream => {}
            SourceEvent::Error(error) => failure(error),
            SourceEvent::Stopped => {
                let (Some(inner), Some(entry)) = (weak_inner.upgrade(), weak_entry.upgrade())
                else {
                    return;
                };
                if entry.active_sources.fetch_sub(1, Ordering::AcqRel) != 1 {
                    return;
                }
                // Last source drained on its own; finish the query without
                // an explicit stop.
                if matches!(
                    entry.current_state(),
                    QueryState::Started | QueryState::Running
                ) {
                    std::thread::spawn(move || {
                        if let Err(e) = finalize(&inner, &entry) {
                            entry.fail(&e);
                        }
                    });
                }
            }
        })
    }

    /// Stops the sources, drains the runtime and transitions to `Stopped`.
    /// Stopping an already terminated query is a no-op.
    pub fn stop(&self, id: LocalQueryId) -> Result<()> {
        let entry = self.entry(id)?;
        {
            let mut state = entry.state.write();
            match state.0 {
                QueryState::Stopped | QueryState::Failed => return Ok(()),
                QueryState::Registered => {
                    return Err(StreamError::InvalidQueryStateTransition {
                        query_id: id,
                        operation: "stop",
                        state: state.0,
                    })
                }
                _ => state.0 = QueryState::Stopping,
            }
        }

        let sources: Vec<_> = entry.sources.lock().clone();
        for source in sources {
            if let Err(e) = source.stop() {
                entry.fail(&e);
                return Err(e);
            }
        }
        finalize(&self.inner, &entry)
    }

    /// Removes a registered or terminated query.
    pub fn unregister(&self, id: LocalQueryId) -> Result<()> {
        let entry = self.entry(id)?;
        let state = entry.current_state();
        if state != QueryState::Registered && state.is_active() {
            return Err(StreamError::InvalidQueryStateTransition {
                query_id: id,
                operation: "unregister",
                state,
            });
        }
        self.inner.queries.write().remove(&id);
        tracing::debug!(query_id = %id, "unregistered query");
        Ok(())
    }

    /// A consistent snapshot of one query's state and metrics.
    pub fn status(&self, id: LocalQueryId) -> Result<LocalQueryStatus> {
        let entry = self.entry(id)?;
        let state = entry.state.read();
        Ok(LocalQueryStatus {
            query_id: id,
            state: state.0,
            metrics: state.1.clone(),
        })
    }

    /// Snapshots of every known query.
    pub fn all_statuses(&self) -> Vec<LocalQueryStatus> {
        let queries = self.inner.queries.read();
        queries
            .values()
            .map(|entry| {
                let state = entry.state.read();
                LocalQueryStatus {
                    query_id: entry.id,
                    state: state.0,
                    metrics: state.1.clone(),
                }
            })
            .collect()
    }

    /// Stops the worker threads. Running queries keep their state; this is
    /// process shutdown, not query shutdown.
    pub fn shutdown(&self) {
        self.inner.worker_stop.request_stop();
        for handle in self.inner.worker_handles.lock().drain(..) {
            let _ = handle.join();
        }
    }
}

/// Drains the task queue, force-triggers remaining window state and closes
/// the sinks, then transitions to `Stopped` (unless already failed).
fn finalize(inner: &Arc<EngineInner>, entry: &Arc<QueryEntry>) -> Result<()> {
    if entry
        .finalizing
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        // Another finalize is running; wait for it to settle.
        let deadline = Instant::now() + DRAIN_TIMEOUT;
        while entry.current_state().is_active() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        return Ok(());
    }

    inner.task_queue.wait_until_idle(DRAIN_TIMEOUT);

    let worker = WorkerContext::new(WorkerThreadId::new(0), inner.buffer_manager.clone());
    let guard = entry.lowered.lock();
    if let Some(lowered) = guard.as_ref() {
        // Reverse creation order: build pipelines flush their windows into
        // the probe queues before the probes are torn down.
        for pipeline in lowered.pipelines.iter().rev() {
            if let Err(e) = pipeline.terminate(&worker) {
                entry.fail(&e);
            }
            inner.task_queue.wait_until_idle(DRAIN_TIMEOUT);
        }
        for handle in &lowered.sinks {
            if let Err(e) = handle.sink.lock().close() {
                entry.fail(&e.into());
            }
        }
    }
    drop(guard);

    let mut state = entry.state.write();
    if state.0.is_active() {
        state.0 = QueryState::Stopped;
        state.1.stop = Some(current_time_millis());
    }
    tracing::debug!(query_id = %entry.id, state = ?state.0, "query finalized");
    Ok(())
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.worker_stop.request_stop();
        for handle in self.worker_handles.get_mut().drain(..) {
            let _ = handle.join();
        }
    }
}
