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

//! The submission contract between the query manager and one worker.

use rill_common::ids::{LocalQueryId, WorkerId};
use rill_common::query::LocalQueryStatus;
use rill_plan::LogicalPlan;
use rill_stream::NodeEngine;

use crate::error::Result;

/// One worker's side of the submission protocol. The gRPC transport
/// implementing this against a remote worker lives outside this workspace;
/// [`EmbeddedWorkerBackend`] implements it in-process.
pub trait QuerySubmissionBackend: Send + Sync {
    fn worker_id(&self) -> WorkerId;

    /// Hands the worker its subplan; the returned id names the query in all
    /// later calls.
    fn register_query(&self, plan: &LogicalPlan) -> Result<LocalQueryId>;

    fn start(&self, id: LocalQueryId) -> Result<()>;

    fn stop(&self, id: LocalQueryId) -> Result<()>;

    fn unregister(&self, id: LocalQueryId) -> Result<()>;

    fn status(&self, id: LocalQueryId) -> Result<LocalQueryStatus>;
}

/// An in-process worker backend over a [`NodeEngine`], for single-process
/// deployments and tests.
pub struct EmbeddedWorkerBackend {
    worker_id: WorkerId,
    engine: NodeEngine,
}

impl EmbeddedWorkerBackend {
    pub fn new(worker_id: WorkerId, engine: NodeEngine) -> Self {
        Self { worker_id, engine }
    }

    pub fn engine(&self) -> &NodeEngine {
        &self.engine
    }
}

impl QuerySubmissionBackend for EmbeddedWorkerBackend {
    fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    fn register_query(&self, plan: &LogicalPlan) -> Result<LocalQueryId> {
        Ok(self.engine.register_query(plan)?)
    }

    fn start(&self, id: LocalQueryId) -> Result<()> {
        Ok(self.engine.start(id)?)
    }

    fn stop(&self, id: LocalQueryId) -> Result<()> {
        Ok(self.engine.stop(id)?)
    }

    fn unregister(&self, id: LocalQueryId) -> Result<()> {
        Ok(self.engine.unregister(id)?)
    }

    fn status(&self, id: LocalQueryId) -> Result<LocalQueryStatus> {
        Ok(self.engine.status(id)?)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::io::Write;
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use rill_common::catalog::{Field, ParserConfig, Schema};
    use rill_common::config::RillConfig;
    use rill_common::query::QueryState;
    use rill_common::types::{DataType, VarVal};
    use rill_connector::sink::collected_results;
    use rill_connector::SourceCatalog;
    use rill_optimizer::distribute::decompose;
    use rill_optimizer::placement::place;
    use rill_optimizer::stage::Optimizer;
    use rill_optimizer::Topology;
    use rill_plan::builder::QueryPlanBuilder;
    use rill_plan::function::{constant, field, greater_than};

    use super::*;
    use crate::manager::QueryManager;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("a", DataType::Int32),
            Field::new("b", DataType::Int32),
            Field::new("c", DataType::Int32),
        ])
        .unwrap()
    }

    /// Serves bytes on a loopback port, then keeps the connection open until
    /// told to finish, so the query stays active while the test inspects it.
    fn spawn_holding_server(payload: &'static [u8]) -> (u16, std::sync::mpsc::Sender<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (sender, receiver) = std::sync::mpsc::channel::<()>();
        std::thread::spawn(move || {
            if let Ok((mut socket, _)) = listener.accept() {
                socket.write_all(payload).unwrap();
                let _ = receiver.recv_timeout(Duration::from_secs(30));
            }
        });
        (port, sender)
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if condition() {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("condition never became true");
    }

    /// The whole control path at once: catalog, rewrite stages, placement,
    /// decomposition, submission, execution, status aggregation.
    #[test]
    fn submitted_query_runs_end_to_end() {
        let (port, finish) = spawn_holding_server(b"1,2,3\n2,3,4\n");

        let worker = WorkerId::new(1);
        let catalog = SourceCatalog::new();
        let logical = catalog.add_logical_source("numbers", schema()).unwrap();
        catalog
            .add_physical_source(
                &logical,
                "TCP",
                worker,
                BTreeMap::from([
                    ("host".to_owned(), "127.0.0.1".to_owned()),
                    ("port".to_owned(), port.to_string()),
                ]),
                ParserConfig::default(),
            )
            .unwrap();

        let plan = QueryPlanBuilder::from_source("numbers", schema())
            .filter(greater_than(field("a"), constant(VarVal::Int32(1))))
            .sink("embedded-e2e", "Collect", worker);
        let optimized = Optimizer::new(Arc::new(catalog)).optimize(&plan).unwrap();

        let mut topology = Topology::new();
        topology.add_node(worker, 4);
        let placed = place(optimized, &topology).unwrap();
        let distributed = decompose(placed).unwrap();
        assert_eq!(distributed.subplans.len(), 1);

        let engine = NodeEngine::new(RillConfig::default()).unwrap();
        let backend = Arc::new(EmbeddedWorkerBackend::new(worker, engine))
            as Arc<dyn QuerySubmissionBackend>;
        let manager = QueryManager::new(vec![backend]);

        let registered_before = rill_common::util::current_time_millis() - 1;
        let query = manager.register(&distributed).unwrap();
        assert_eq!(
            manager.status(query).unwrap().state,
            QueryState::Registered
        );

        manager.start(query).unwrap();
        let results = collected_results("embedded-e2e");
        wait_for(|| !results.lock().is_empty());

        // The source connection is still open: the query shows up active.
        let worker_statuses = manager.worker_status(registered_before).unwrap();
        assert_eq!(worker_statuses.len(), 1);
        assert_eq!(worker_statuses[0].active_queries.len(), 1);

        manager.stop(query).unwrap();
        let _ = finish.send(());

        let status = manager.status(query).unwrap();
        assert_eq!(status.state, QueryState::Stopped);
        assert!(status.stop.unwrap() >= status.start.unwrap());

        let worker_statuses = manager.worker_status(registered_before).unwrap();
        assert_eq!(worker_statuses[0].terminated_queries.len(), 1);
        let terminated = &worker_statuses[0].terminated_queries[0];
        assert!(terminated.stop.unwrap() >= terminated.start.unwrap());

        assert_eq!(
            *results.lock(),
            vec![rill_common::record::Record::new(vec![
                VarVal::Int32(2),
                VarVal::Int32(3),
                VarVal::Int32(4),
            ])]
        );

        manager.unregister(query).unwrap();
        assert!(matches!(
            manager.status(query),
            Err(crate::error::MetaError::QueryNotFound(_))
        ));
    }
}

