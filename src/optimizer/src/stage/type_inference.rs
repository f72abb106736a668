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

//! Bottom-up schema and stamp inference.

use std::collections::HashMap;

use rill_common::ids::OperatorId;
use rill_plan::{LogicalOperator, LogicalPlan, PlanError};

use crate::error::Result;

/// Infers child schemas first, then each operator's own output schema, and
/// attaches output-schema traits throughout the plan. Fails with a typed
/// error when a payload references an unknown field or a type-incompatible
/// operation.
pub fn infer_types(plan: &LogicalPlan) -> Result<LogicalPlan> {
    let mut cache: HashMap<OperatorId, LogicalOperator> = HashMap::new();
    let roots = plan
        .root_operators()
        .iter()
        .map(|root| infer_recursive(root, &mut cache))
        .collect::<Result<Vec<_>>>()?;
    Ok(plan.with_root_operators(roots))
}

fn infer_recursive(
    op: &LogicalOperator,
    cache: &mut HashMap<OperatorId, LogicalOperator>,
) -> Result<LogicalOperator> {
    if let Some(done) = cache.get(&op.id()) {
        return Ok(done.clone());
    }
    let children = op
        .children()
        .iter()
        .map(|child| infer_recursive(child, cache))
        .collect::<Result<Vec<_>>>()?;
    let child_schemas = children
        .iter()
        .map(|child| {
            child
                .output_schema()
                .ok_or_else(|| PlanError::StampNotInferred(child.to_string()).into())
        })
        .collect::<Result<Vec<_>>>()?;
    let inferred = op
        .with_children(children)
        .infer_output_schema(&child_schemas)?;
    cache.insert(op.id(), inferred.clone());
    Ok(inferred)
}

#[cfg(test)]
mod tests {
    use rill_common::catalog::{Field, Schema};
    use rill_common::ids::WorkerId;
    use rill_common::types::{DataType, VarVal};
    use rill_plan::builder::QueryPlanBuilder;
    use rill_plan::function::{constant, field, greater_than};

    use super::*;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::UInt32),
            Field::new("value", DataType::UInt64),
        ])
        .unwrap()
    }

    #[test]
    fn all_operators_carry_schemas_afterwards() {
        let plan = QueryPlanBuilder::from_source("cars", schema())
            .filter(greater_than(field("value"), constant(VarVal::UInt64(5))))
            .map("double", rill_plan::function::mul(field("value"), constant(VarVal::UInt64(2))))
            .sink("out", "Collect", WorkerId::new(1));

        let inferred = infer_types(&plan).unwrap();
        for op in inferred.iter_bfs() {
            assert!(op.output_schema().is_some(), "{op} has no schema");
        }
        let map = inferred
            .iter_bfs()
            .find(|op| op.kind() == "Map")
            .unwrap();
        assert_eq!(
            map.output_schema().unwrap().get_field("double").unwrap().data_type,
            DataType::UInt64
        );
    }

    #[test]
    fn inference_is_idempotent() {
        let plan = QueryPlanBuilder::from_source("cars", schema())
            .filter(greater_than(field("value"), constant(VarVal::UInt64(5))))
            .sink("out", "Collect", WorkerId::new(1));

        let once = infer_types(&plan).unwrap();
        let twice = infer_types(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn unknown_field_fails_with_typed_error() {
        let plan = QueryPlanBuilder::from_source("cars", schema())
            .filter(greater_than(field("missing"), constant(VarVal::UInt64(5))))
            .sink("out", "Collect", WorkerId::new(1));

        let err = infer_types(&plan).unwrap_err();
        assert!(matches!(
            err,
            crate::error::OptimizerError::Plan(PlanError::FieldNotFound(name)) if name == "missing"
        ));
    }
}
