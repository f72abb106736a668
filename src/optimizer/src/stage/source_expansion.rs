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

//! Expands logical-source leaves into their registered physical sources.

use std::collections::HashMap;

use rill_common::ids::{OperatorId, OriginId};
use rill_connector::SourceCatalog;
use rill_plan::operator::{SourceOperator, UnionOperator};
use rill_plan::traits::OriginTrait;
use rill_plan::{LogicalOperator, LogicalPlan, TraitSet};

use crate::error::{OptimizerError, Result};

/// Replaces every unexpanded source with one leaf per registered physical
/// source, each carrying a fresh origin.
///
/// With `duplicate_intermediate_subtrees`, chains of non-blocking operators
/// above an expanded source are duplicated per physical source and merged by
/// a union right below the first blocking operator (or the sink). Without
/// it, the union sits directly above the physical sources.
pub fn expand_logical_sources(
    plan: &LogicalPlan,
    catalog: &SourceCatalog,
    duplicate_intermediate_subtrees: bool,
) -> Result<LogicalPlan> {
    let mut cache: HashMap<OperatorId, Vec<LogicalOperator>> = HashMap::new();
    let roots = plan
        .root_operators()
        .iter()
        .map(|root| {
            let variants = expand_recursive(
                root,
                catalog,
                duplicate_intermediate_subtrees,
                &mut cache,
            )?;
            Ok(merge_variants(variants))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(plan.with_root_operators(roots))
}

/// Operators a physical-source duplicate may flow through without merging.
fn is_duplicable(op: &LogicalOperator) -> bool {
    matches!(op.kind(), "Filter" | "Map" | "Projection" | "WatermarkAssigner")
        && op.children().len() == 1
}

fn merge_variants(mut variants: Vec<LogicalOperator>) -> LogicalOperator {
    if variants.len() == 1 {
        variants.remove(0)
    } else {
        LogicalOperator::new(UnionOperator::new()).with_children(variants)
    }
}

fn expand_recursive(
    op: &LogicalOperator,
    catalog: &SourceCatalog,
    duplicate: bool,
    cache: &mut HashMap<OperatorId, Vec<LogicalOperator>>,
) -> Result<Vec<LogicalOperator>> {
    // Sharing is only preserved when nothing gets duplicated; the
    // duplicating flavor deliberately multiplies shared subtrees per root.
    if !duplicate {
        if let Some(done) = cache.get(&op.id()) {
            return Ok(done.clone());
        }
    }

    let result = if let Some(source) = op.try_get::<SourceOperator>() {
        if source.is_expanded() {
            vec![op.clone()]
        } else {
            let descriptors = catalog.physical_sources_of(source.logical_source_name())?;
            if descriptors.is_empty() {
                return Err(OptimizerError::UnsupportedQuery(format!(
                    "logical source {} has no physical sources",
                    source.logical_source_name()
                )));
            }
            descriptors
                .into_iter()
                .map(|descriptor| {
                    LogicalOperator::new(SourceOperator::physical(descriptor)).with_trait_set(
                        TraitSet::new().with(OriginTrait(OriginId::generate())),
                    )
                })
                .collect()
        }
    } else {
        let expanded_children = op
            .children()
            .iter()
            .map(|child| expand_recursive(child, catalog, duplicate, cache))
            .collect::<Result<Vec<_>>>()?;

        if duplicate
            && is_duplicable(op)
            && expanded_children.len() == 1
            && expanded_children[0].len() > 1
        {
            // One duplicate of this operator per physical-source variant.
            expanded_children[0]
                .iter()
                .map(|child| op.with_new_id().with_children(vec![child.clone()]))
                .collect()
        } else {
            let children = expanded_children
                .into_iter()
                .map(merge_variants)
                .collect();
            vec![op.with_children(children)]
        }
    };

    if !duplicate {
        cache.insert(op.id(), result.clone());
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rill_common::catalog::{Field, ParserConfig, Schema};
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

    fn catalog_with_two_physical_sources() -> SourceCatalog {
        let catalog = SourceCatalog::new();
        let logical = catalog.add_logical_source("cars", schema()).unwrap();
        for worker in [1, 2] {
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
        catalog
    }

    fn filter_plan() -> LogicalPlan {
        QueryPlanBuilder::from_source("cars", schema())
            .filter(greater_than(field("value"), constant(VarVal::UInt64(1))))
            .sink("out", "Collect", WorkerId::new(1))
    }

    #[test]
    fn expansion_without_duplication_unions_the_sources() {
        let catalog = catalog_with_two_physical_sources();
        let expanded = expand_logical_sources(&filter_plan(), &catalog, false).unwrap();

        let kinds: Vec<_> = expanded.iter_bfs().map(|op| op.kind()).collect();
        assert_eq!(kinds, vec!["Sink", "Filter", "Union", "Source", "Source"]);

        // Each physical source carries a distinct origin.
        let origins: Vec<_> = expanded
            .get_leaf_operators()
            .iter()
            .map(|op| op.trait_set().get::<OriginTrait>().unwrap().0)
            .collect();
        assert_ne!(origins[0], origins[1]);
    }

    #[test]
    fn expansion_with_duplication_duplicates_the_filter_per_source() {
        let catalog = catalog_with_two_physical_sources();
        let expanded = expand_logical_sources(&filter_plan(), &catalog, true).unwrap();

        let kinds: Vec<_> = expanded.iter_bfs().map(|op| op.kind()).collect();
        assert_eq!(
            kinds,
            vec!["Sink", "Union", "Filter", "Filter", "Source", "Source"]
        );

        // The duplicated filters are distinct operators over one predicate.
        let filters: Vec<_> = expanded
            .iter_bfs()
            .filter(|op| op.kind() == "Filter")
            .collect();
        assert_ne!(filters[0].id(), filters[1].id());
        assert_eq!(filters[0], filters[1]);
    }

    #[test]
    fn shared_source_under_two_sinks_stays_shared_without_duplication() {
        let catalog = catalog_with_two_physical_sources();
        let source =
            LogicalOperator::new(SourceOperator::logical("cars", schema()));
        let sink_a = LogicalOperator::new(rill_plan::operator::SinkOperator::new(
            "a", "Collect", WorkerId::new(1),
        ))
        .with_children(vec![source.clone()]);
        let sink_b = LogicalOperator::new(rill_plan::operator::SinkOperator::new(
            "b", "Collect", WorkerId::new(1),
        ))
        .with_children(vec![source]);
        let plan = LogicalPlan::new(rill_common::ids::QueryId::new(1), vec![sink_a, sink_b]);

        let expanded = expand_logical_sources(&plan, &catalog, false).unwrap();
        // Union + two physical sources, shared by both sinks.
        assert_eq!(expanded.flatten().len(), 2 + 1 + 2);
    }

    #[test]
    fn unknown_logical_source_fails() {
        let catalog = SourceCatalog::new();
        assert!(expand_logical_sources(&filter_plan(), &catalog, false).is_err());
    }
}
