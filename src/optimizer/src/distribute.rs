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

//! Decomposes a placed plan into per-worker subplans.
//!
//! A plan edge whose endpoints are placed on different workers is cut into a
//! bridge pair: the upstream worker's subplan ends in a `NetworkBridge`
//! sink, the downstream worker's subplan starts at a matching bridge source
//! with the cut operator's output schema. The transport carrying bridge
//! traffic lives outside this workspace.

use std::collections::BTreeMap;

use rill_common::ids::WorkerId;
use rill_plan::operator::{SinkOperator, SourceOperator};
use rill_plan::traits::PlacementTrait;
use rill_plan::{LogicalOperator, LogicalPlan, PlanError};

use crate::error::{OptimizerError, Result};
use crate::stage::{DistributedLogicalPlan, PlacedLogicalPlan, WorkerSubPlan};

/// Splits `placed` at placement boundaries.
pub fn decompose(placed: PlacedLogicalPlan) -> Result<DistributedLogicalPlan> {
    let plan = placed.plan;
    let mut roots_per_worker: BTreeMap<WorkerId, Vec<LogicalOperator>> = BTreeMap::new();

    for root in plan.root_operators() {
        let worker = placement_of(root)?;
        let rebuilt = split_recursive(root, worker, &mut roots_per_worker)?;
        roots_per_worker.entry(worker).or_default().push(rebuilt);
    }

    let subplans = roots_per_worker
        .into_iter()
        .map(|(worker_id, roots)| WorkerSubPlan {
            worker_id,
            plan: plan.with_root_operators(roots),
        })
        .collect();

    Ok(DistributedLogicalPlan {
        subplans,
        optimized: plan,
    })
}

/// Renders a decomposed plan as its submission wire message, as handed to
/// the transport carrying it to remote workers.
pub fn to_submission(distributed: &DistributedLogicalPlan) -> rill_pb::PbQuerySubmission {
    let encode_plan = |plan: &LogicalPlan| rill_pb::PbLogicalPlan {
        query_id: plan.query_id().raw(),
        original_sql: plan.original_sql().to_owned(),
        root_operators: plan
            .root_operators()
            .iter()
            .map(|root| root.serialize())
            .collect(),
    };
    rill_pb::PbQuerySubmission {
        subplans: distributed
            .subplans
            .iter()
            .map(|subplan| rill_pb::PbWorkerSubPlan {
                worker_id: subplan.worker_id.raw(),
                plan: Some(encode_plan(&subplan.plan)),
            })
            .collect(),
        optimized_plan: Some(encode_plan(&distributed.optimized)),
    }
}

fn placement_of(op: &LogicalOperator) -> Result<WorkerId> {
    op.placement().ok_or_else(|| {
        OptimizerError::Plan(PlanError::StampNotInferred(format!(
            "operator {} has no placement",
            op.id()
        )))
    })
}

fn split_recursive(
    op: &LogicalOperator,
    worker: WorkerId,
    roots_per_worker: &mut BTreeMap<WorkerId, Vec<LogicalOperator>>,
) -> Result<LogicalOperator> {
    let mut children = vec![];
    for child in op.children() {
        let child_worker = placement_of(&child)?;
        if child_worker == worker {
            children.push(split_recursive(&child, worker, roots_per_worker)?);
            continue;
        }

        // Cut the edge: the child's worker gets a bridge sink over the
        // child's subtree, this worker continues from a bridge source.
        let bridge_name = format!("bridge-{}", child.id());
        let child_schema = child.output_schema().ok_or_else(|| {
            OptimizerError::Plan(PlanError::StampNotInferred(child.to_string()))
        })?;

        let upstream = split_recursive(&child, child_worker, roots_per_worker)?;
        let bridge_sink = LogicalOperator::new(SinkOperator::new(
            bridge_name.clone(),
            "NetworkBridge",
            child_worker,
        ))
        .with_trait_set(
            rill_plan::TraitSet::new().with(PlacementTrait(child_worker)),
        )
        .with_children(vec![upstream]);
        roots_per_worker
            .entry(child_worker)
            .or_default()
            .push(bridge_sink);

        let bridge_source =
            LogicalOperator::new(SourceOperator::logical(bridge_name, child_schema.clone()))
                .with_trait_set(
                    rill_plan::TraitSet::new()
                        .with(PlacementTrait(worker))
                        .with(rill_plan::traits::OutputSchemaTrait(child_schema)),
                );
        children.push(bridge_source);
    }
    Ok(op.with_children(children))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap as ConfigMap;

    use rill_common::catalog::{Field, ParserConfig, Schema};
    use rill_common::types::{DataType, VarVal};
    use rill_connector::SourceCatalog;
    use rill_plan::builder::QueryPlanBuilder;
    use rill_plan::function::{constant, field, greater_than};

    use super::*;
    use crate::placement::place;
    use crate::stage::Optimizer;
    use crate::topology::Topology;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::UInt32),
            Field::new("value", DataType::UInt64),
        ])
        .unwrap()
    }

    fn placed_two_worker_plan() -> PlacedLogicalPlan {
        let catalog = SourceCatalog::new();
        let logical = catalog.add_logical_source("cars", schema()).unwrap();
        catalog
            .add_physical_source(
                &logical,
                "Inline",
                WorkerId::new(2),
                ConfigMap::from([("payload".to_owned(), "1,2\n".to_owned())]),
                ParserConfig::default(),
            )
            .unwrap();

        let plan = QueryPlanBuilder::from_source("cars", schema())
            .filter(greater_than(field("value"), constant(VarVal::UInt64(1))))
            .sink("out", "Collect", WorkerId::new(1));
        let optimized = Optimizer::new(std::sync::Arc::new(catalog))
            .optimize(&plan)
            .unwrap();

        // sink worker 1 <- worker 2 (source edge)
        let mut topology = Topology::new();
        topology.add_node(WorkerId::new(1), 4);
        topology.add_node(WorkerId::new(2), 4);
        topology.add_link(WorkerId::new(1), WorkerId::new(2));

        place(optimized, &topology).unwrap()
    }

    #[test]
    fn cross_worker_edges_become_bridge_pairs() {
        let distributed = decompose(placed_two_worker_plan()).unwrap();
        assert_eq!(distributed.subplans.len(), 2);

        let worker1 = &distributed.subplans[0];
        let worker2 = &distributed.subplans[1];
        assert_eq!(worker1.worker_id, WorkerId::new(1));
        assert_eq!(worker2.worker_id, WorkerId::new(2));

        // Worker 2 ends in a bridge sink above the filter and source.
        let bridge_sink = &worker2.plan.root_operators()[0];
        assert_eq!(bridge_sink.kind(), "Sink");
        let sink = bridge_sink.try_get::<SinkOperator>().unwrap();
        assert_eq!(sink.sink_type(), "NetworkBridge");

        // Worker 1 starts from the matching bridge source.
        let leaves = worker1.plan.get_leaf_operators();
        assert_eq!(leaves.len(), 1);
        let bridge_source = leaves[0].try_get::<SourceOperator>().unwrap();
        assert_eq!(bridge_source.logical_source_name(), sink.sink_name());
        assert_eq!(bridge_source.schema(), &schema());
    }

    #[test]
    fn submission_message_carries_every_subplan() {
        let distributed = decompose(placed_two_worker_plan()).unwrap();
        let submission = to_submission(&distributed);
        assert_eq!(submission.subplans.len(), 2);
        assert_eq!(submission.subplans[0].worker_id, 1);
        assert_eq!(submission.subplans[1].worker_id, 2);

        let optimized = submission.optimized_plan.as_ref().unwrap();
        assert_eq!(optimized.root_operators.len(), 1);
        assert_eq!(optimized.root_operators[0].kind, "Sink");
        // Placement survives serialization.
        assert_eq!(optimized.root_operators[0].placement_worker_id, Some(1));
    }

    #[test]
    fn single_worker_plan_stays_whole() {
        let catalog = SourceCatalog::new();
        let logical = catalog.add_logical_source("cars", schema()).unwrap();
        catalog
            .add_physical_source(
                &logical,
                "Inline",
                WorkerId::new(1),
                ConfigMap::from([("payload".to_owned(), "1,2\n".to_owned())]),
                ParserConfig::default(),
            )
            .unwrap();

        let plan = QueryPlanBuilder::from_source("cars", schema())
            .filter(greater_than(field("value"), constant(VarVal::UInt64(1))))
            .sink("out", "Collect", WorkerId::new(1));
        let optimized = Optimizer::new(std::sync::Arc::new(catalog))
            .optimize(&plan)
            .unwrap();

        let mut topology = Topology::new();
        topology.add_node(WorkerId::new(1), 4);
        let placed = place(optimized, &topology).unwrap();

        let distributed = decompose(placed.clone()).unwrap();
        assert_eq!(distributed.subplans.len(), 1);
        assert_eq!(distributed.subplans[0].plan, placed.plan);
    }
}
