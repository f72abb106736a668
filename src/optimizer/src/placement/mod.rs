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

//! Operator placement.
//!
//! Builds a boolean assignment model over (operator, node) pairs: exactly
//! one node per operator, node capacities with zero demand for sources and
//! sinks, pinned sources and sink, and connectivity between parent and
//! child placements. The objective minimizes the summed upstream distance
//! of every operator to each of its descendant sources.

mod solver;

use std::collections::HashMap;

use rill_plan::operator::{SinkOperator, SourceOperator};
use rill_plan::traits::PlacementTrait;
use rill_plan::{LogicalOperator, LogicalPlan};
use rill_common::ids::{OperatorId, WorkerId};

use crate::error::{OptimizerError, Result};
use crate::stage::{OptimizedLogicalPlan, PlacedLogicalPlan};
use crate::topology::Topology;

use solver::{PlacementModel, SolveOutcome};

/// Wall deadline of the placement search.
const SOLVER_DEADLINE: std::time::Duration = std::time::Duration::from_secs(1);

/// Demand an operator puts on its node: free for the pinned endpoints,
/// one slot for everything else.
fn operator_capacity_demand(op: &LogicalOperator) -> usize {
    if op.try_get::<SourceOperator>().is_some() || op.try_get::<SinkOperator>().is_some() {
        0
    } else {
        1
    }
}

fn pinned_worker(op: &LogicalOperator) -> Result<Option<WorkerId>> {
    if let Some(source) = op.try_get::<SourceOperator>() {
        let descriptor = source.descriptor().ok_or_else(|| {
            OptimizerError::PlacementFailure(format!(
                "source {} is not bound to a physical source",
                source.logical_source_name()
            ))
        })?;
        return Ok(Some(descriptor.worker_id));
    }
    if let Some(sink) = op.try_get::<SinkOperator>() {
        return Ok(Some(sink.worker_id()));
    }
    Ok(None)
}

/// Assigns every operator of a single-root optimized plan to a worker node
/// and attaches the [`PlacementTrait`]s.
pub fn place(input: OptimizedLogicalPlan, topology: &Topology) -> Result<PlacedLogicalPlan> {
    let plan = input.plan;
    if plan.root_operators().len() != 1 {
        return Err(OptimizerError::UnsupportedQuery(format!(
            "placement requires exactly one root operator, got {}",
            plan.root_operators().len()
        )));
    }
    plan.root_operators()[0]
        .try_get::<SinkOperator>()
        .ok_or_else(|| {
            OptimizerError::UnsupportedQuery("placement requires a sink root".to_owned())
        })?;

    let model = PlacementModel::build(&plan, topology, operator_capacity_demand, pinned_worker)?;
    let assignment = match model.solve(SOLVER_DEADLINE) {
        SolveOutcome::Optimal(assignment) => assignment,
        SolveOutcome::Feasible(assignment) => {
            tracing::warn!("placement found a non optimal solution");
            assignment
        }
        SolveOutcome::Infeasible => {
            return Err(OptimizerError::PlacementFailure(
                "no feasible placement exists for this topology".to_owned(),
            ))
        }
        SolveOutcome::DeadlineExhausted => {
            return Err(OptimizerError::PlacementFailure(
                "placement solver did not find a feasible solution within the time limit"
                    .to_owned(),
            ))
        }
    };

    let root = attach_placement(&plan.root_operators()[0], &assignment);
    Ok(PlacedLogicalPlan {
        plan: plan.with_root_operators(vec![root]),
    })
}

fn attach_placement(
    op: &LogicalOperator,
    assignment: &HashMap<OperatorId, WorkerId>,
) -> LogicalOperator {
    let children = op
        .children()
        .iter()
        .map(|child| attach_placement(child, assignment))
        .collect();
    let traits = op
        .trait_set()
        .with(PlacementTrait(assignment[&op.id()]));
    op.with_children(children).with_trait_set(traits)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rill_common::catalog::{Field, ParserConfig, Schema};
    use rill_common::types::{DataType, VarVal};
    use rill_connector::SourceCatalog;
    use rill_plan::builder::QueryPlanBuilder;
    use rill_plan::function::{constant, field, greater_than};

    use super::*;
    use crate::stage::Optimizer;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::UInt32),
            Field::new("value", DataType::UInt64),
        ])
        .unwrap()
    }

    fn catalog_on_workers(workers: &[u64]) -> std::sync::Arc<SourceCatalog> {
        let catalog = SourceCatalog::new();
        let logical = catalog.add_logical_source("cars", schema()).unwrap();
        for &worker in workers {
            catalog
                .add_physical_source(
                    &logical,
                    "Inline",
                    WorkerId::new(worker),
                    BTreeMap::from([("payload".to_owned(), "1,2\n".to_owned())]),
                    ParserConfig::default(),
                )
                .unwrap();
        }
        std::sync::Arc::new(catalog)
    }

    fn optimized(
        catalog: &std::sync::Arc<SourceCatalog>,
        sink_worker: u64,
    ) -> OptimizedLogicalPlan {
        let plan = QueryPlanBuilder::from_source("cars", schema())
            .filter(greater_than(field("value"), constant(VarVal::UInt64(1))))
            .sink("out", "Collect", WorkerId::new(sink_worker));
        Optimizer::new(std::sync::Arc::clone(catalog))
            .optimize(&plan)
            .unwrap()
    }

    #[test]
    fn single_node_topology_places_everything_there() {
        let mut topology = Topology::new();
        topology.add_node(WorkerId::new(1), 4);

        let catalog = catalog_on_workers(&[1]);
        let placed = place(optimized(&catalog, 1), &topology).unwrap();
        for op in placed.plan.iter_bfs() {
            assert_eq!(op.placement(), Some(WorkerId::new(1)));
        }
    }

    #[test]
    fn intermediate_operators_respect_connectivity() {
        // sink worker 1 <- 2 <- 3 (source edge)
        let mut topology = Topology::new();
        for id in 1..=3 {
            topology.add_node(WorkerId::new(id), 4);
        }
        topology.add_link(WorkerId::new(1), WorkerId::new(2));
        topology.add_link(WorkerId::new(2), WorkerId::new(3));

        let catalog = catalog_on_workers(&[3]);
        let placed = place(optimized(&catalog, 1), &topology).unwrap();

        let filter = placed
            .plan
            .iter_bfs()
            .find(|op| op.kind() == "Filter")
            .unwrap();
        let node = filter.placement().unwrap();
        // Minimizing source distance pulls the filter onto the source node.
        assert_eq!(node, WorkerId::new(3));

        for op in placed.plan.iter_bfs() {
            for child in op.children() {
                assert!(topology
                    .has_upstream_path(op.placement().unwrap(), child.placement().unwrap()));
            }
        }
    }

    #[test]
    fn capacity_exhaustion_fails_placement() {
        let mut topology = Topology::new();
        topology.add_node(WorkerId::new(1), 0);

        let catalog = catalog_on_workers(&[1]);
        let result = place(optimized(&catalog, 1), &topology);
        assert!(matches!(
            result,
            Err(OptimizerError::PlacementFailure(_))
        ));
    }

    #[test]
    fn disconnected_pins_fail_placement() {
        // Two source leaves pinned to nodes with no common path to the sink.
        let mut topology = Topology::new();
        for id in 1..=3 {
            topology.add_node(WorkerId::new(id), 4);
        }
        // 1 can reach 2 upstream, but 3 is an island.
        topology.add_link(WorkerId::new(1), WorkerId::new(2));

        let catalog = catalog_on_workers(&[2, 3]);
        let result = place(optimized(&catalog, 1), &topology);
        assert!(matches!(
            result,
            Err(OptimizerError::PlacementFailure(_))
        ));
    }
}
