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

//! Splits central windowed aggregations over multi-source inputs.

use std::collections::HashSet;

use rill_plan::operator::{
    SliceCreationOperator, WindowComputationOperator, WindowedAggregationOperator,
};
use rill_plan::plan::{replace_subtree, BfsIter};
use rill_plan::{LogicalOperator, LogicalPlan};

use crate::error::Result;

/// Replaces every keyed windowed aggregation whose input spans more than one
/// source with a distributed pair: per-source slice creation feeding one
/// central window computation.
pub fn distribute_windows(plan: &LogicalPlan) -> Result<LogicalPlan> {
    let mut result = plan.clone();
    for op in plan.flatten() {
        let Some(aggregation) = op.try_get::<WindowedAggregationOperator>() else {
            continue;
        };
        if count_distinct_sources(&op) < 2 {
            continue;
        }

        let child = op.children().remove(0);
        let branches = if child.kind() == "Union" {
            child.children()
        } else {
            vec![child]
        };
        let slice_creations = branches
            .into_iter()
            .map(|branch| {
                LogicalOperator::new(SliceCreationOperator::new(
                    aggregation.window().clone(),
                    aggregation.keys().to_vec(),
                    aggregation.aggregations().to_vec(),
                ))
                .with_children(vec![branch])
            })
            .collect();
        let computation = LogicalOperator::new(WindowComputationOperator::new(
            aggregation.window().clone(),
            aggregation.keys().to_vec(),
            aggregation.aggregations().to_vec(),
        ))
        .with_children(slice_creations);

        tracing::debug!(operator_id = %op.id(), "distributing windowed aggregation");
        result = replace_subtree(&result, op.id(), &computation).unwrap_or(result);
    }
    Ok(result)
}

fn count_distinct_sources(op: &LogicalOperator) -> usize {
    let mut sources = HashSet::new();
    for node in BfsIter::new(op.clone()) {
        if node.kind() == "Source" {
            sources.insert(node.id());
        }
    }
    sources.len()
}
