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

//! Content signatures for plan-sharing lookups.

use std::collections::HashMap;
use std::hash::Hasher;

use rill_common::ids::OperatorId;
use rill_plan::traits::SignatureTrait;
use rill_plan::{ExplainVerbosity, LogicalOperator, LogicalPlan};
use twox_hash::XxHash64;

use crate::error::Result;

/// Attaches a [`SignatureTrait`] to every operator: a content hash over the
/// operator payload, its input schemas and its children's signatures. Equal
/// subtrees hash equal regardless of operator ids. Runs after type
/// inference.
pub fn infer_signatures(plan: &LogicalPlan) -> Result<LogicalPlan> {
    let mut cache: HashMap<OperatorId, (LogicalOperator, u64)> = HashMap::new();
    let roots = plan
        .root_operators()
        .iter()
        .map(|root| sign_recursive(root, &mut cache).0)
        .collect();
    Ok(plan.with_root_operators(roots))
}

fn sign_recursive(
    op: &LogicalOperator,
    cache: &mut HashMap<OperatorId, (LogicalOperator, u64)>,
) -> (LogicalOperator, u64) {
    if let Some(done) = cache.get(&op.id()) {
        return done.clone();
    }
    let (children, child_signatures): (Vec<_>, Vec<_>) = op
        .children()
        .iter()
        .map(|child| sign_recursive(child, cache))
        .unzip();

    let mut hasher = XxHash64::with_seed(0);
    hasher.write(op.kind().as_bytes());
    hasher.write(op.explain(ExplainVerbosity::Debug).as_bytes());
    for child in &children {
        if let Some(schema) = child.output_schema() {
            hasher.write(schema.to_string().as_bytes());
        }
    }
    for signature in child_signatures {
        hasher.write_u64(signature);
    }
    let signature = hasher.finish();

    let signed = op
        .with_children(children)
        .with_trait_set(op.trait_set().with(SignatureTrait(signature)));
    cache.insert(op.id(), (signed.clone(), signature));
    (signed, signature)
}

#[cfg(test)]
mod tests {
    use rill_common::catalog::{Field, Schema};
    use rill_common::ids::WorkerId;
    use rill_common::types::{DataType, VarVal};
    use rill_plan::builder::QueryPlanBuilder;
    use rill_plan::function::{constant, field, greater_than};

    use super::*;
    use crate::stage::type_inference::infer_types;

    fn make_plan(threshold: u64) -> LogicalPlan {
        let schema = Schema::new(vec![
            Field::new("id", DataType::UInt32),
            Field::new("value", DataType::UInt64),
        ])
        .unwrap();
        let plan = QueryPlanBuilder::from_source("cars", schema)
            .filter(greater_than(
                field("value"),
                constant(VarVal::UInt64(threshold)),
            ))
            .sink("out", "Collect", WorkerId::new(1));
        infer_types(&plan).unwrap()
    }

    #[test]
    fn equal_subtrees_hash_equal_across_plans() {
        let a = infer_signatures(&make_plan(5)).unwrap();
        let b = infer_signatures(&make_plan(5)).unwrap();

        let signature_of = |plan: &LogicalPlan, kind: &str| {
            plan.iter_bfs()
                .find(|op| op.kind() == kind)
                .unwrap()
                .trait_set()
                .get::<SignatureTrait>()
                .unwrap()
                .0
        };
        assert_eq!(signature_of(&a, "Filter"), signature_of(&b, "Filter"));

        let different = infer_signatures(&make_plan(6)).unwrap();
        assert_ne!(
            signature_of(&a, "Filter"),
            signature_of(&different, "Filter")
        );
    }
}
