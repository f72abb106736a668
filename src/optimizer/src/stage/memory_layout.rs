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

//! Chooses the physical buffer layout per operator.

use std::collections::HashMap;

use rill_common::catalog::MemoryLayoutHint;
use rill_common::ids::OperatorId;
use rill_plan::traits::{MemoryLayoutTrait, OutputSchemaTrait};
use rill_plan::{LogicalOperator, LogicalPlan};

use crate::error::Result;

/// Annotates every operator with the layout selected by `policy` and aligns
/// the inferred output schema's layout hint with it. Runs after type
/// inference.
pub fn select_memory_layout(
    plan: &LogicalPlan,
    policy: MemoryLayoutHint,
) -> Result<LogicalPlan> {
    let mut cache: HashMap<OperatorId, LogicalOperator> = HashMap::new();
    let roots = plan
        .root_operators()
        .iter()
        .map(|root| annotate_recursive(root, policy, &mut cache))
        .collect::<Vec<_>>();
    Ok(plan.with_root_operators(roots))
}

fn annotate_recursive(
    op: &LogicalOperator,
    policy: MemoryLayoutHint,
    cache: &mut HashMap<OperatorId, LogicalOperator>,
) -> LogicalOperator {
    if let Some(done) = cache.get(&op.id()) {
        return done.clone();
    }
    let children = op
        .children()
        .iter()
        .map(|child| annotate_recursive(child, policy, cache))
        .collect();

    let mut traits = op.trait_set().with(MemoryLayoutTrait(policy));
    if let Some(schema) = traits.get::<OutputSchemaTrait>().map(|t| t.0.clone()) {
        traits.insert(OutputSchemaTrait(schema.with_layout_hint(policy)));
    }
    let annotated = op.with_children(children).with_trait_set(traits);
    cache.insert(op.id(), annotated.clone());
    annotated
}

#[cfg(test)]
mod tests {
    use rill_common::catalog::{Field, Schema};
    use rill_common::ids::WorkerId;
    use rill_common::types::DataType;
    use rill_plan::builder::QueryPlanBuilder;

    use super::*;
    use crate::stage::type_inference::infer_types;

    #[test]
    fn every_operator_gets_the_policy_layout() {
        let schema = Schema::new(vec![Field::new("id", DataType::UInt32)]).unwrap();
        let plan = QueryPlanBuilder::from_source("cars", schema)
            .project(vec!["id".into()])
            .sink("out", "Collect", WorkerId::new(1));
        let plan = infer_types(&plan).unwrap();

        let annotated =
            select_memory_layout(&plan, MemoryLayoutHint::ColumnarLayout).unwrap();
        for op in annotated.iter_bfs() {
            assert_eq!(
                op.trait_set().get::<MemoryLayoutTrait>().unwrap().0,
                MemoryLayoutHint::ColumnarLayout
            );
            assert_eq!(
                op.output_schema().unwrap().layout_hint(),
                MemoryLayoutHint::ColumnarLayout
            );
        }
    }
}
