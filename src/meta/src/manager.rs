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

//! The authoritative query state machine across workers.
//!
//! Registration fans a decomposed plan out to the submission backends of
//! its workers; every later transition runs under that backend's write
//! lock, so each query sees at most one authoritative transition at a time.
//! Status reads take the same locks for a consistent snapshot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use itertools::Itertools;
use parking_lot::RwLock;
use rill_common::ids::{LocalQueryId, QueryId, WorkerId};
use rill_common::query::{LocalQueryStatus, QueryState};
use rill_common::util::current_time_millis;
use rill_optimizer::stage::DistributedLogicalPlan;

use crate::backend::QuerySubmissionBackend;
use crate::error::{MetaError, Result};

/// The status surface exposed to clients.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GlobalQueryStatus {
    pub query_id: QueryId,
    pub state: QueryState,
    pub start: Option<u64>,
    pub running: Option<u64>,
    pub stop: Option<u64>,
    pub error_message: Option<String>,
}

/// One worker's active and terminated queries, as reported by
/// [`QueryManager::worker_status`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerStatus {
    pub worker_id: WorkerId,
    pub active_queries: Vec<LocalQueryId>,
    pub terminated_queries: Vec<TerminatedQuery>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TerminatedQuery {
    pub local_query_id: LocalQueryId,
    pub start: Option<u64>,
    pub stop: Option<u64>,
    pub error: Option<String>,
}

struct BackendSlot {
    backend: Arc<dyn QuerySubmissionBackend>,
    /// Serializes transitions against this backend; reads share it.
    lock: RwLock<()>,
}

struct ManagedQuery {
    placements: Vec<(WorkerId, LocalQueryId)>,
    registered_at: u64,
}

/// Registers, starts, stops and unregisters queries across workers.
pub struct QueryManager {
    backends: HashMap<WorkerId, BackendSlot>,
    queries: RwLock<HashMap<QueryId, ManagedQuery>>,
    next_query_id: AtomicU64,
}

impl QueryManager {
    pub fn new(backends: Vec<Arc<dyn QuerySubmissionBackend>>) -> Self {
        Self {
            backends: backends
                .into_iter()
                .map(|backend| {
                    (
                        backend.worker_id(),
                        BackendSlot {
                            backend,
                            lock: RwLock::new(()),
                        },
                    )
                })
                .collect(),
            queries: RwLock::new(HashMap::new()),
            next_query_id: AtomicU64::new(1),
        }
    }

    fn slot(&self, worker: WorkerId) -> Result<&BackendSlot> {
        self.backends
            .get(&worker)
            .ok_or(MetaError::UnknownWorker(worker))
    }

    /// Submits a decomposed plan: every worker registers its subplan.
    pub fn register(&self, distributed: &DistributedLogicalPlan) -> Result<QueryId> {
        let query_id = QueryId::new(self.next_query_id.fetch_add(1, Ordering::Relaxed));
        let mut placements = vec![];
        for subplan in &distributed.subplans {
            let slot = self.slot(subplan.worker_id)?;
            let _guard = slot.lock.write();
            let plan = subplan.plan.with_query_id(query_id);
            let local_id = slot.backend.register_query(&plan)?;
            placements.push((subplan.worker_id, local_id));
        }
        tracing::info!(%query_id, workers = placements.len(), "registered query");
        self.queries.write().insert(
            query_id,
            ManagedQuery {
                placements,
                registered_at: current_time_millis(),
            },
        );
        Ok(query_id)
    }

    fn placements_of(&self, query_id: QueryId) -> Result<Vec<(WorkerId, LocalQueryId)>> {
        self.queries
            .read()
            .get(&query_id)
            .map(|managed| managed.placements.clone())
            .ok_or(MetaError::QueryNotFound(query_id))
    }

    pub fn start(&self, query_id: QueryId) -> Result<()> {
        for (worker, local_id) in self.placements_of(query_id)? {
            let slot = self.slot(worker)?;
            let _guard = slot.lock.write();
            slot.backend.start(local_id)?;
        }
        Ok(())
    }

    pub fn stop(&self, query_id: QueryId) -> Result<()> {
        for (worker, local_id) in self.placements_of(query_id)? {
            let slot = self.slot(worker)?;
            let _guard = slot.lock.write();
            slot.backend.stop(local_id)?;
        }
        Ok(())
    }

    /// Unregisters everywhere and removes the query.
    pub fn unregister(&self, query_id: QueryId) -> Result<()> {
        for (worker, local_id) in self.placements_of(query_id)? {
            let slot = self.slot(worker)?;
            let _guard = slot.lock.write();
            slot.backend.unregister(local_id)?;
        }
        self.queries.write().remove(&query_id);
        Ok(())
    }

    /// Aggregated status across every placement of the query.
    pub fn status(&self, query_id: QueryId) -> Result<GlobalQueryStatus> {
        let mut statuses = vec![];
        for (worker, local_id) in self.placements_of(query_id)? {
            let slot = self.slot(worker)?;
            let _guard = slot.lock.read();
            statuses.push(slot.backend.status(local_id)?);
        }
        Ok(aggregate_status(query_id, &statuses))
    }

    /// For every worker with a query registered after `after` (ms since
    /// epoch): its still-active and its terminated queries.
    pub fn worker_status(&self, after: u64) -> Result<Vec<WorkerStatus>> {
        let placements: Vec<(WorkerId, LocalQueryId)> = {
            let queries = self.queries.read();
            queries
                .values()
                .filter(|managed| managed.registered_at > after)
                .flat_map(|managed| managed.placements.iter().copied())
                .collect()
        };

        let mut by_worker: HashMap<WorkerId, WorkerStatus> = HashMap::new();
        for (worker, local_id) in placements {
            let slot = self.slot(worker)?;
            let _guard = slot.lock.read();
            let status = slot.backend.status(local_id)?;
            let entry = by_worker.entry(worker).or_insert_with(|| WorkerStatus {
                worker_id: worker,
                active_queries: vec![],
                terminated_queries: vec![],
            });
            if status.state.is_active() {
                entry.active_queries.push(local_id);
            } else {
                entry.terminated_queries.push(TerminatedQuery {
                    local_query_id: local_id,
                    start: status.metrics.start,
                    stop: status.metrics.stop,
                    error: status.metrics.error,
                });
            }
        }
        Ok(by_worker
            .into_values()
            .sorted_by_key(|status| status.worker_id)
            .collect())
    }
}

fn aggregate_status(query_id: QueryId, statuses: &[LocalQueryStatus]) -> GlobalQueryStatus {
    let states = statuses.iter().map(|s| s.state).collect_vec();
    let state = if states.iter().any(|s| *s == QueryState::Failed) {
        QueryState::Failed
    } else if !states.is_empty() && states.iter().all(|s| *s == QueryState::Stopped) {
        QueryState::Stopped
    } else if states.iter().any(|s| *s == QueryState::Stopping) {
        QueryState::Stopping
    } else if !states.is_empty() && states.iter().all(|s| *s == QueryState::Running) {
        QueryState::Running
    } else if states
        .iter()
        .any(|s| matches!(s, QueryState::Started | QueryState::Running | QueryState::Stopped))
    {
        QueryState::Started
    } else {
        QueryState::Registered
    };

    GlobalQueryStatus {
        query_id,
        state,
        start: statuses.iter().filter_map(|s| s.metrics.start).min(),
        running: statuses.iter().filter_map(|s| s.metrics.running).min(),
        stop: statuses.iter().filter_map(|s| s.metrics.stop).max(),
        error_message: statuses
            .iter()
            .find_map(|s| s.metrics.error.clone()),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use rill_common::query::QueryMetrics;
    use rill_optimizer::stage::WorkerSubPlan;
    use rill_plan::LogicalPlan;

    use super::*;

    /// An in-memory backend mirroring the worker-side state machine,
    /// without any runtime behind it.
    struct MockSubmissionBackend {
        worker_id: WorkerId,
        state: Mutex<MockState>,
    }

    #[derive(Default)]
    struct MockState {
        next_id: u64,
        registered: HashSet<LocalQueryId>,
        running: HashSet<LocalQueryId>,
        stopped: HashSet<LocalQueryId>,
        metrics: HashMap<LocalQueryId, QueryMetrics>,
    }

    impl MockSubmissionBackend {
        fn new(worker_id: WorkerId) -> Self {
            Self {
                worker_id,
                state: Mutex::new(MockState::default()),
            }
        }
    }

    impl QuerySubmissionBackend for MockSubmissionBackend {
        fn worker_id(&self) -> WorkerId {
            self.worker_id
        }

        fn register_query(&self, _plan: &LogicalPlan) -> Result<LocalQueryId> {
            let mut state = self.state.lock();
            state.next_id += 1;
            let id = LocalQueryId::new(state.next_id);
            state.registered.insert(id);
            state.metrics.insert(id, QueryMetrics::default());
            Ok(id)
        }

        fn start(&self, id: LocalQueryId) -> Result<()> {
            let mut state = self.state.lock();
            if !state.registered.remove(&id) {
                return Err(MetaError::InvalidQuerySyntax(format!(
                    "query {id} was not registered"
                )));
            }
            state.running.insert(id);
            let now = current_time_millis();
            let metrics = state.metrics.entry(id).or_default();
            metrics.start = Some(now);
            metrics.running = Some(now);
            Ok(())
        }

        fn stop(&self, id: LocalQueryId) -> Result<()> {
            let mut state = self.state.lock();
            if !state.running.remove(&id) {
                return Err(MetaError::InvalidQuerySyntax(format!(
                    "query {id} was not started"
                )));
            }
            state.stopped.insert(id);
            state.metrics.entry(id).or_default().stop = Some(current_time_millis());
            Ok(())
        }

        fn unregister(&self, id: LocalQueryId) -> Result<()> {
            let mut state = self.state.lock();
            let known = state.registered.remove(&id)
                || state.running.remove(&id)
                || state.stopped.remove(&id);
            if !known {
                return Err(MetaError::InvalidQuerySyntax(format!(
                    "query {id} was not registered"
                )));
            }
            state.metrics.remove(&id);
            Ok(())
        }

        fn status(&self, id: LocalQueryId) -> Result<LocalQueryStatus> {
            let state = self.state.lock();
            let query_state = if state.registered.contains(&id) {
                QueryState::Registered
            } else if state.running.contains(&id) {
                QueryState::Running
            } else if state.stopped.contains(&id) {
                QueryState::Stopped
            } else {
                return Err(MetaError::InvalidQuerySyntax(format!(
                    "query {id} is unknown"
                )));
            };
            Ok(LocalQueryStatus {
                query_id: id,
                state: query_state,
                metrics: state.metrics.get(&id).cloned().unwrap_or_default(),
            })
        }
    }

    fn distributed_plan(workers: &[u64]) -> DistributedLogicalPlan {
        let plan = LogicalPlan::new(QueryId::INVALID, vec![]);
        DistributedLogicalPlan {
            subplans: workers
                .iter()
                .map(|&worker| WorkerSubPlan {
                    worker_id: WorkerId::new(worker),
                    plan: plan.clone(),
                })
                .collect(),
            optimized: plan,
        }
    }

    fn manager(workers: &[u64]) -> QueryManager {
        QueryManager::new(
            workers
                .iter()
                .map(|&worker| {
                    Arc::new(MockSubmissionBackend::new(WorkerId::new(worker)))
                        as Arc<dyn QuerySubmissionBackend>
                })
                .collect(),
        )
    }

    #[test]
    fn lifecycle_over_two_workers() {
        let manager = manager(&[1, 2]);
        let query = manager.register(&distributed_plan(&[1, 2])).unwrap();
        assert_eq!(manager.status(query).unwrap().state, QueryState::Registered);

        manager.start(query).unwrap();
        let status = manager.status(query).unwrap();
        assert_eq!(status.state, QueryState::Running);
        assert!(status.start.is_some());

        manager.stop(query).unwrap();
        let status = manager.status(query).unwrap();
        assert_eq!(status.state, QueryState::Stopped);
        assert!(status.stop.unwrap() >= status.start.unwrap());
    }

    #[test]
    fn worker_status_partitions_active_and_terminated() {
        let manager = manager(&[1]);
        let running = manager.register(&distributed_plan(&[1])).unwrap();
        let finished = manager.register(&distributed_plan(&[1])).unwrap();
        manager.start(running).unwrap();
        manager.start(finished).unwrap();
        manager.stop(finished).unwrap();

        let statuses = manager.worker_status(0).unwrap();
        assert_eq!(statuses.len(), 1);
        let worker = &statuses[0];
        assert_eq!(worker.worker_id, WorkerId::new(1));
        assert_eq!(worker.active_queries.len(), 1);
        assert_eq!(worker.terminated_queries.len(), 1);

        let terminated = &worker.terminated_queries[0];
        assert!(terminated.stop.unwrap() >= terminated.start.unwrap());
        assert!(terminated.error.is_none());

        // A cutoff after registration filters everything out.
        let later = current_time_millis() + 1000;
        assert!(manager.worker_status(later).unwrap().is_empty());
    }

    #[test]
    fn unregister_removes_the_query_everywhere() {
        let manager = manager(&[1, 2]);
        let query = manager.register(&distributed_plan(&[1, 2])).unwrap();
        manager.unregister(query).unwrap();
        assert!(matches!(
            manager.status(query),
            Err(MetaError::QueryNotFound(_))
        ));
    }

    #[test]
    fn unknown_worker_is_rejected_at_registration() {
        let manager = manager(&[1]);
        assert!(matches!(
            manager.register(&distributed_plan(&[7])),
            Err(MetaError::UnknownWorker(_))
        ));
    }
}
