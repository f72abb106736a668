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

//! Orders contiguous filter chains by selectivity.

use rill_plan::operator::FilterOperator;
use rill_plan::{LogicalOperator, LogicalPlan};

/// Within every contiguous chain of filters, reorders so that selectivity
/// ascends from the top of the chain downward. Chains broken by a map, a
/// join or any other operator are left in place.
pub fn reorder_predicates(plan: &LogicalPlan) -> LogicalPlan {
    let roots = plan
        .root_operators()
        .iter()
        .map(reorder_recursive)
        .collect();
    plan.with_root_operators(roots)
}

fn is_chain_filter(op: &LogicalOperator) -> bool {
    op.try_get::<FilterOperator>().is_some() && op.children().len() == 1
}

fn reorder_recursive(op: &LogicalOperator) -> LogicalOperator {
    if is_chain_filter(op) {
        let mut chain = vec![];
        let mut cursor = op.clone();
        while is_chain_filter(&cursor) {
            chain.push(cursor.clone());
            let next = cursor.children().remove(0);
            cursor = next;
        }
        let below = reorder_recursive(&cursor);

        // A stable sort keeps already-ordered chains untouched.
        chain.sort_by(|a, b| {
            let sa = a.get::<FilterOperator>().map(|f| f.selectivity()).unwrap_or(1.0);
            let sb = b.get::<FilterOperator>().map(|f| f.selectivity()).unwrap_or(1.0);
            sa.partial_cmp(&sb).unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut current = below;
        for filter in chain.iter().rev() {
            current = filter.with_children(vec![current]);
        }
        return current;
    }

    let children = op.children().iter().map(reorder_recursive).collect();
    op.with_children(children)
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;
    use rill_common::catalog::{Field, Schema};
    use rill_common::ids::WorkerId;
    use rill_common::types::{DataType, VarVal};
    use rill_plan::builder::QueryPlanBuilder;
    use rill_plan::function::{constant, field, greater_than, less_than};

    use super::*;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::UInt32),
            Field::new("value", DataType::UInt64),
        ])
        .unwrap()
    }

    fn selectivities_from_sink(plan: &LogicalPlan) -> Vec<f64> {
        plan.iter_bfs()
            .filter_map(|op| op.try_get::<FilterOperator>().map(|f| f.selectivity()))
            .collect_vec()
    }

    #[test]
    fn scrambled_chain_is_sorted_ascending_from_the_top() {
        // From the sink the chain reads 0.1, 0.9, 0.5.
        let plan = QueryPlanBuilder::from_source("cars", schema())
            .filter_with_selectivity(
                less_than(field("id"), constant(VarVal::UInt32(45))),
                0.5,
            )
            .filter_with_selectivity(
                greater_than(field("value"), constant(VarVal::UInt64(2))),
                0.9,
            )
            .filter_with_selectivity(
                less_than(field("value"), constant(VarVal::UInt64(9))),
                0.1,
            )
            .sink("out", "Collect", WorkerId::new(1));

        assert_eq!(selectivities_from_sink(&plan), vec![0.1, 0.9, 0.5]);
        let reordered = reorder_predicates(&plan);
        assert_eq!(selectivities_from_sink(&reordered), vec![0.1, 0.5, 0.9]);
    }

    #[test]
    fn reversed_chain_gets_rewritten() {
        let plan = QueryPlanBuilder::from_source("cars", schema())
            .filter_with_selectivity(
                less_than(field("id"), constant(VarVal::UInt32(45))),
                0.1,
            )
            .filter_with_selectivity(
                greater_than(field("value"), constant(VarVal::UInt64(2))),
                0.5,
            )
            .filter_with_selectivity(
                less_than(field("value"), constant(VarVal::UInt64(9))),
                0.9,
            )
            .sink("out", "Collect", WorkerId::new(1));

        assert_eq!(selectivities_from_sink(&plan), vec![0.9, 0.5, 0.1]);
        let reordered = reorder_predicates(&plan);
        assert_eq!(selectivities_from_sink(&reordered), vec![0.1, 0.5, 0.9]);

        // The filter below the chain still feeds from the source.
        let last_filter = reordered
            .iter_bfs()
            .filter(|op| op.kind() == "Filter")
            .last()
            .unwrap();
        assert_eq!(last_filter.children()[0].kind(), "Source");
    }

    #[test]
    fn chain_broken_by_a_map_is_left_in_place() {
        let plan = QueryPlanBuilder::from_source("cars", schema())
            .filter_with_selectivity(
                less_than(field("id"), constant(VarVal::UInt32(45))),
                0.2,
            )
            .map("twice", rill_plan::function::mul(field("value"), constant(VarVal::UInt64(2))))
            .filter_with_selectivity(
                greater_than(field("value"), constant(VarVal::UInt64(2))),
                0.6,
            )
            .sink("out", "Collect", WorkerId::new(1));

        let reordered = reorder_predicates(&plan);
        assert_eq!(plan, reordered);
    }

    #[test]
    fn already_ordered_chain_is_a_no_op() {
        let plan = QueryPlanBuilder::from_source("cars", schema())
            .filter_with_selectivity(
                less_than(field("id"), constant(VarVal::UInt32(45))),
                0.6,
            )
            .filter_with_selectivity(
                greater_than(field("value"), constant(VarVal::UInt64(2))),
                0.2,
            )
            .sink("out", "Collect", WorkerId::new(1));

        let reordered = reorder_predicates(&plan);
        assert_eq!(plan, reordered);
    }
}
