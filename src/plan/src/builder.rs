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

//! Fluent plan construction, used by bindings and tests.

use rill_common::catalog::Schema;
use rill_common::ids::{QueryId, WorkerId};

use crate::function::Function;
use crate::operator::{
    AggregationDescriptor, FilterOperator, JoinOperator, JoinStrategy, LogicalOperator,
    MapOperator, ProjectionOperator, SinkOperator, SourceOperator, UnionOperator,
    WatermarkAssignerOperator, WindowedAggregationOperator,
};
use crate::plan::LogicalPlan;
use crate::window::{TimeCharacteristic, WindowSpec};

/// Builds a plan bottom-up, mirroring how queries compose: start `from` a
/// source, chain operators, finish with [`QueryPlanBuilder::sink`].
#[derive(Clone, Debug)]
pub struct QueryPlanBuilder {
    current: LogicalOperator,
}

impl QueryPlanBuilder {
    /// Starts from an unbound logical source.
    pub fn from_source(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            current: LogicalOperator::new(SourceOperator::logical(name, schema)),
        }
    }

    /// Starts from an arbitrary subtree.
    pub fn from_operator(op: LogicalOperator) -> Self {
        Self { current: op }
    }

    fn chain<T: crate::operator::OperatorConcept>(self, op: T) -> Self {
        Self {
            current: LogicalOperator::new(op).with_children(vec![self.current]),
        }
    }

    pub fn filter(self, predicate: Function) -> Self {
        self.chain(FilterOperator::new(predicate))
    }

    pub fn filter_with_selectivity(self, predicate: Function, selectivity: f64) -> Self {
        self.chain(FilterOperator::new(predicate).with_selectivity(selectivity))
    }

    pub fn map(self, assignment_field: impl Into<String>, expression: Function) -> Self {
        self.chain(MapOperator::new(assignment_field, expression))
    }

    pub fn project(self, fields: Vec<String>) -> Self {
        self.chain(ProjectionOperator::new(fields))
    }

    pub fn assign_watermark(self, time: TimeCharacteristic) -> Self {
        self.chain(WatermarkAssignerOperator::new(time))
    }

    pub fn window_aggregation(
        self,
        window: WindowSpec,
        keys: Vec<String>,
        aggregations: Vec<AggregationDescriptor>,
    ) -> Self {
        self.chain(WindowedAggregationOperator::new(window, keys, aggregations))
    }

    /// Unions this stream with `other`.
    pub fn union_with(self, other: QueryPlanBuilder) -> Self {
        Self {
            current: LogicalOperator::new(UnionOperator::new())
                .with_children(vec![self.current, other.current]),
        }
    }

    /// Joins this stream (left) with `other` (right) over a window.
    pub fn join_with(
        self,
        other: QueryPlanBuilder,
        condition: Function,
        window: WindowSpec,
        strategy: JoinStrategy,
    ) -> Self {
        Self {
            current: LogicalOperator::new(JoinOperator::new(condition, window, strategy))
                .with_children(vec![self.current, other.current]),
        }
    }

    /// The current subtree without a sink, for composing builders.
    pub fn build_operator(self) -> LogicalOperator {
        self.current
    }

    /// Finishes the plan with a sink pinned to `worker_id`.
    pub fn sink(
        self,
        sink_name: impl Into<String>,
        sink_type: impl Into<String>,
        worker_id: WorkerId,
    ) -> LogicalPlan {
        let sink = LogicalOperator::new(SinkOperator::new(sink_name, sink_type, worker_id))
            .with_children(vec![self.current]);
        LogicalPlan::new(QueryId::INVALID, vec![sink])
    }
}

#[cfg(test)]
mod tests {
    use rill_common::catalog::Field;
    use rill_common::types::{DataType, VarVal};

    use super::*;
    use crate::function::{constant, field, greater_than};
    use crate::operator::AggregationKind;
    use crate::window::TimeUnit;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::UInt32),
            Field::new("value", DataType::UInt64),
            Field::new("ts", DataType::UInt64),
        ])
        .unwrap()
    }

    #[test]
    fn builds_the_expected_chain() {
        let plan = QueryPlanBuilder::from_source("cars", schema())
            .filter(greater_than(field("value"), constant(VarVal::UInt64(10))))
            .window_aggregation(
                WindowSpec::tumbling_event_time("ts", TimeUnit::Milliseconds, 1000),
                vec!["id".into()],
                vec![AggregationDescriptor::new(
                    AggregationKind::Sum,
                    "value",
                    "sum",
                )],
            )
            .sink("out", "Collect", WorkerId::new(1));

        let kinds: Vec<_> = plan.iter_bfs().map(|op| op.kind()).collect();
        assert_eq!(
            kinds,
            vec!["Sink", "WindowedAggregation", "Filter", "Source"]
        );
    }

    #[test]
    fn join_builder_creates_two_branches() {
        let left = QueryPlanBuilder::from_source("left", schema());
        let right = QueryPlanBuilder::from_source("right", schema());
        let plan = left
            .join_with(
                right,
                greater_than(field("left.value"), field("right.value")),
                WindowSpec::tumbling_event_time("ts", TimeUnit::Milliseconds, 1000),
                JoinStrategy::NestedLoop,
            )
            .sink("out", "Collect", WorkerId::new(1));

        let join = plan
            .iter_bfs()
            .find(|op| op.kind() == "Join")
            .unwrap();
        assert_eq!(join.children().len(), 2);
    }
}
