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

//! The immutable plan value and its traversal and mutation operations.

use std::collections::{HashSet, VecDeque};

use itertools::Itertools;

use crate::operator::{ExplainVerbosity, LogicalOperator};
use rill_common::ids::{OperatorId, QueryId};

/// A query plan: one or more root operators (typically sinks) over a shared,
/// cycle-free operator DAG.
#[derive(Clone, Debug)]
pub struct LogicalPlan {
    query_id: QueryId,
    original_sql: String,
    root_operators: Vec<LogicalOperator>,
}

impl LogicalPlan {
    pub fn new(query_id: QueryId, root_operators: Vec<LogicalOperator>) -> Self {
        Self {
            query_id,
            original_sql: String::new(),
            root_operators,
        }
    }

    pub fn with_sql(
        query_id: QueryId,
        root_operators: Vec<LogicalOperator>,
        original_sql: impl Into<String>,
    ) -> Self {
        Self {
            query_id,
            original_sql: original_sql.into(),
            root_operators,
        }
    }

    pub fn from_root(root: LogicalOperator) -> Self {
        Self::new(QueryId::INVALID, vec![root])
    }

    pub fn query_id(&self) -> QueryId {
        self.query_id
    }

    pub fn with_query_id(&self, query_id: QueryId) -> LogicalPlan {
        let mut copy = self.clone();
        copy.query_id = query_id;
        copy
    }

    pub fn original_sql(&self) -> &str {
        &self.original_sql
    }

    pub fn root_operators(&self) -> &[LogicalOperator] {
        &self.root_operators
    }

    pub fn with_root_operators(&self, root_operators: Vec<LogicalOperator>) -> LogicalPlan {
        let mut copy = self.clone();
        copy.root_operators = root_operators;
        copy
    }

    /// BFS over all roots. Shared DAG nodes are yielded once per reaching
    /// path; callers needing set semantics deduplicate by [`OperatorId`].
    pub fn iter_bfs(&self) -> impl Iterator<Item = LogicalOperator> + '_ {
        self.root_operators.iter().flat_map(|root| BfsIter::new(root.clone()))
    }

    /// All operators, deduplicated by id.
    pub fn flatten(&self) -> Vec<LogicalOperator> {
        let mut visited = HashSet::new();
        let mut operators = vec![];
        for op in self.iter_bfs() {
            if visited.insert(op.id()) {
                operators.push(op);
            }
        }
        operators
    }

    /// All operators without children, deduplicated by id.
    pub fn get_leaf_operators(&self) -> Vec<LogicalOperator> {
        let mut visited = HashSet::new();
        let mut leaves = vec![];
        for op in self.iter_bfs() {
            if visited.insert(op.id()) && op.children().is_empty() {
                leaves.push(op);
            }
        }
        leaves
    }

    pub fn get_operator_by_id(&self, operator_id: OperatorId) -> Option<LogicalOperator> {
        self.iter_bfs().find(|op| op.id() == operator_id)
    }

    /// Parents of `target`, recovered by scan.
    pub fn get_parents(&self, target: &LogicalOperator) -> Vec<LogicalOperator> {
        let mut visited = HashSet::new();
        let mut parents = vec![];
        for op in self.iter_bfs() {
            if visited.insert(op.id())
                && op.children().iter().any(|c| c.id() == target.id())
            {
                parents.push(op);
            }
        }
        parents
    }

    pub fn explain(&self, verbosity: ExplainVerbosity) -> String {
        fn render(op: &LogicalOperator, depth: usize, verbosity: ExplainVerbosity, out: &mut String) {
            out.push_str(&"  ".repeat(depth));
            out.push_str(&op.explain(verbosity));
            out.push('\n');
            for child in op.children() {
                render(&child, depth + 1, verbosity, out);
            }
        }
        let mut out = String::new();
        for root in &self.root_operators {
            render(root, 0, verbosity, &mut out);
        }
        out
    }
}

impl std::fmt::Display for LogicalPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.explain(ExplainVerbosity::Short))
    }
}

/// Two plans are equal when their root vectors pair up and a worklist
/// traversal finds every reachable `(left, right)` pair locally equal, with
/// children matched after sorting by operator id. The visited pair set makes
/// this terminate on shared sub-DAGs.
impl PartialEq for LogicalPlan {
    fn eq(&self, other: &Self) -> bool {
        if self.root_operators.len() != other.root_operators.len() {
            return false;
        }

        let mut work: Vec<(LogicalOperator, LogicalOperator)> = vec![];
        let mut seen_pairs: HashSet<(u64, u64)> = HashSet::new();

        let mut push_pair =
            |work: &mut Vec<_>, l: &LogicalOperator, r: &LogicalOperator| {
                if seen_pairs.insert((l.id().raw(), r.id().raw())) {
                    work.push((l.clone(), r.clone()));
                }
            };

        for (l, r) in self.root_operators.iter().zip(other.root_operators.iter()) {
            push_pair(&mut work, l, r);
        }

        while let Some((l, r)) = work.pop() {
            if l != r {
                return false;
            }
            let lc = l.children();
            let rc = r.children();
            if lc.len() != rc.len() {
                return false;
            }
            let lc_sorted = lc.iter().sorted_by_key(|op| op.id()).collect_vec();
            let rc_sorted = rc.iter().sorted_by_key(|op| op.id()).collect_vec();
            for (lchild, rchild) in lc_sorted.into_iter().zip(rc_sorted) {
                push_pair(&mut work, lchild, rchild);
            }
        }
        true
    }
}

/// Level-order iterator starting at one root. Not deduplicated.
pub struct BfsIter {
    queue: VecDeque<LogicalOperator>,
}

impl BfsIter {
    pub fn new(root: LogicalOperator) -> Self {
        let mut queue = VecDeque::new();
        queue.push_back(root);
        Self { queue }
    }
}

impl Iterator for BfsIter {
    type Item = LogicalOperator;

    fn next(&mut self) -> Option<LogicalOperator> {
        let op = self.queue.pop_front()?;
        self.queue.extend(op.children());
        Some(op)
    }
}

fn replace_operator_recursion(
    current: &mut LogicalOperator,
    target: OperatorId,
    replacement: &LogicalOperator,
) -> bool {
    if current.id() == target {
        *current = replacement.with_children(current.children());
        return true;
    }
    let mut children = current.children();
    let mut replaced = false;
    for child in &mut children {
        if replace_operator_recursion(child, target, replacement) {
            replaced = true;
        }
    }
    if replaced {
        *current = current.with_children(children);
    }
    replaced
}

/// Replaces the operator with id `target` by `replacement`, preserving the
/// old operator's children. Returns `None` when no such id exists.
pub fn replace_operator(
    plan: &LogicalPlan,
    target: OperatorId,
    replacement: &LogicalOperator,
) -> Option<LogicalPlan> {
    let mut replaced = false;
    let mut new_roots = plan.root_operators().to_vec();
    for root in &mut new_roots {
        if replace_operator_recursion(root, target, replacement) {
            replaced = true;
        }
    }
    replaced.then(|| plan.with_root_operators(new_roots))
}

fn replace_subtree_recursion(
    current: &mut LogicalOperator,
    target: OperatorId,
    replacement: &LogicalOperator,
) -> bool {
    if current.id() == target {
        *current = replacement.clone();
        return true;
    }
    let mut children = current.children();
    let mut replaced = false;
    for child in &mut children {
        if replace_subtree_recursion(child, target, replacement) {
            replaced = true;
        }
    }
    if replaced {
        *current = current.with_children(children);
    }
    replaced
}

/// Substitutes the entire subtree rooted at `target` by `replacement`.
/// Returns `None` when no such id exists.
pub fn replace_subtree(
    plan: &LogicalPlan,
    target: OperatorId,
    replacement: &LogicalOperator,
) -> Option<LogicalPlan> {
    let mut replaced = false;
    let mut new_roots = plan.root_operators().to_vec();
    for root in &mut new_roots {
        if replace_subtree_recursion(root, target, replacement) {
            replaced = true;
        }
    }
    replaced.then(|| plan.with_root_operators(new_roots))
}

/// Puts `new_root` on top of all current roots.
pub fn promote_operator_to_root(plan: &LogicalPlan, new_root: LogicalOperator) -> LogicalPlan {
    let root = new_root.with_children(plan.root_operators().to_vec());
    plan.with_root_operators(vec![root])
}

/// Appends `roots_to_add` to the root vector.
pub fn add_root_operators(plan: &LogicalPlan, roots_to_add: Vec<LogicalOperator>) -> LogicalPlan {
    let mut roots = plan.root_operators().to_vec();
    roots.extend(roots_to_add);
    plan.with_root_operators(roots)
}

#[cfg(test)]
mod tests {
    use rill_common::catalog::{Field, Schema};
    use rill_common::ids::WorkerId;
    use rill_common::types::{DataType, VarVal};

    use super::*;
    use crate::function::{constant, field, greater_than};
    use crate::operator::{FilterOperator, SinkOperator, SourceOperator, UnionOperator};

    fn test_schema() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::UInt32),
            Field::new("value", DataType::UInt64),
        ])
        .unwrap()
    }

    fn source() -> LogicalOperator {
        LogicalOperator::new(SourceOperator::logical("cars", test_schema()))
    }

    fn filter() -> LogicalOperator {
        LogicalOperator::new(FilterOperator::new(greater_than(
            field("id"),
            constant(VarVal::UInt32(1)),
        )))
    }

    fn sink() -> LogicalOperator {
        LogicalOperator::new(SinkOperator::new("out", "Collect", WorkerId::new(1)))
    }

    /// sink -> filter -> source
    fn chain_plan() -> LogicalPlan {
        let filter = filter().with_children(vec![source()]);
        let sink = sink().with_children(vec![filter]);
        LogicalPlan::new(QueryId::new(1), vec![sink])
    }

    #[test]
    fn bfs_yields_level_order() {
        let plan = chain_plan();
        let kinds = plan.iter_bfs().map(|op| op.kind()).collect_vec();
        assert_eq!(kinds, vec!["Sink", "Filter", "Source"]);
    }

    #[test]
    fn operator_lookup_matches_bfs() {
        let plan = chain_plan();
        for op in plan.iter_bfs() {
            assert_eq!(plan.get_operator_by_id(op.id()).unwrap().id(), op.id());
        }
        assert!(plan.get_operator_by_id(OperatorId::new(u64::MAX)).is_none());
    }

    #[test]
    fn shared_nodes_are_yielded_per_path_but_flattened_once() {
        // Two sinks sharing one source.
        let shared = source();
        let sink_a = sink().with_children(vec![shared.clone()]);
        let sink_b = sink().with_children(vec![shared.clone()]);
        let plan = LogicalPlan::new(QueryId::new(1), vec![sink_a, sink_b]);

        assert_eq!(plan.iter_bfs().count(), 4);
        assert_eq!(plan.flatten().len(), 3);
        assert_eq!(plan.get_leaf_operators().len(), 1);
        assert_eq!(plan.get_parents(&shared).len(), 2);
    }

    #[test]
    fn replace_operator_preserves_children() {
        let plan = chain_plan();
        let old_filter = plan
            .iter_bfs()
            .find(|op| op.kind() == "Filter")
            .unwrap();

        let stricter = LogicalOperator::new(FilterOperator::new(greater_than(
            field("value"),
            constant(VarVal::UInt64(100)),
        )));
        let updated = replace_operator(&plan, old_filter.id(), &stricter).unwrap();

        let new_filter = updated.get_operator_by_id(stricter.id()).unwrap();
        assert_eq!(new_filter.children().len(), 1);
        assert_eq!(new_filter.children()[0].kind(), "Source");
        assert_eq!(updated.query_id(), plan.query_id());

        assert!(replace_operator(&plan, OperatorId::new(u64::MAX), &stricter).is_none());
    }

    #[test]
    fn replace_subtree_swaps_whole_branch() {
        let plan = chain_plan();
        let old_filter = plan
            .iter_bfs()
            .find(|op| op.kind() == "Filter")
            .unwrap();

        let replacement = source();
        let updated = replace_subtree(&plan, old_filter.id(), &replacement).unwrap();
        assert_eq!(updated.flatten().len(), 2);
        assert_eq!(
            updated.root_operators()[0].children()[0].id(),
            replacement.id()
        );
    }

    #[test]
    fn replace_subtree_round_trips_to_an_equal_plan() {
        let plan = chain_plan();
        let filter = plan
            .iter_bfs()
            .find(|op| op.kind() == "Filter")
            .unwrap();
        let round_tripped = replace_subtree(&plan, filter.id(), &filter).unwrap();
        assert_eq!(plan, round_tripped);
    }

    #[test]
    fn promote_and_add_roots() {
        let plan = chain_plan();
        let promoted = promote_operator_to_root(&plan, LogicalOperator::new(UnionOperator::new()));
        assert_eq!(promoted.root_operators().len(), 1);
        assert_eq!(promoted.root_operators()[0].kind(), "Union");
        assert_eq!(promoted.root_operators()[0].children().len(), 1);

        let extended = add_root_operators(&plan, vec![sink()]);
        assert_eq!(extended.root_operators().len(), 2);
    }

    #[test]
    fn structurally_identical_plans_are_equal() {
        // Ids differ between the two builds; equality is structural.
        assert_eq!(chain_plan(), chain_plan());
    }

    #[test]
    fn differing_payloads_break_equality() {
        let other = {
            let filter = LogicalOperator::new(FilterOperator::new(greater_than(
                field("value"),
                constant(VarVal::UInt64(5)),
            )))
            .with_children(vec![source()]);
            let sink = sink().with_children(vec![filter]);
            LogicalPlan::new(QueryId::new(1), vec![sink])
        };
        assert_ne!(chain_plan(), other);
    }

    #[test]
    fn equality_terminates_on_shared_dags() {
        let make = || {
            let shared = filter().with_children(vec![source()]);
            let sink_a = sink().with_children(vec![shared.clone()]);
            let sink_b = sink().with_children(vec![shared]);
            LogicalPlan::new(QueryId::new(7), vec![sink_a, sink_b])
        };
        assert_eq!(make(), make());
    }
}
