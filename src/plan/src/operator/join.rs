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

use std::collections::HashMap;

use itertools::Itertools;
use rill_common::catalog::Schema;
use rill_common::ids::OperatorId;
use rill_common::types::DataType;

use super::{
    expect_children, impl_operator_common, pb_operator, ExplainVerbosity, LogicalOperator,
    OperatorConcept,
};
use crate::error::{PlanError, Result};
use crate::function::Function;
use crate::traits::{OutputSchemaTrait, TraitSet};
use crate::window::WindowSpec;

/// How the join build side is organized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinStrategy {
    Hash,
    NestedLoop,
}

impl std::fmt::Display for JoinStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JoinStrategy::Hash => write!(f, "Hash"),
            JoinStrategy::NestedLoop => write!(f, "NestedLoop"),
        }
    }
}

/// A windowed two-way join. The output schema is the concatenation of both
/// input schemas; colliding names are disambiguated with `left.`/`right.`
/// prefixes.
#[derive(Clone, Debug)]
pub struct JoinOperator {
    id: OperatorId,
    children: Vec<LogicalOperator>,
    traits: TraitSet,
    condition: Function,
    window: WindowSpec,
    strategy: JoinStrategy,
}

impl JoinOperator {
    pub fn new(condition: Function, window: WindowSpec, strategy: JoinStrategy) -> Self {
        Self {
            id: OperatorId::generate(),
            children: vec![],
            traits: TraitSet::new(),
            condition,
            window,
            strategy,
        }
    }

    pub fn condition(&self) -> &Function {
        &self.condition
    }

    pub fn window(&self) -> &WindowSpec {
        &self.window
    }

    pub fn strategy(&self) -> JoinStrategy {
        self.strategy
    }

    /// The combined probe-side schema, as also used to stamp the condition.
    pub fn combined_schema(left: &Schema, right: &Schema) -> Result<Schema> {
        let colliding = left
            .fields()
            .iter()
            .any(|f| right.contains(&f.name));
        let (left, right) = if colliding {
            (
                left.with_fields_renamed_by_prefix("left"),
                right.with_fields_renamed_by_prefix("right"),
            )
        } else {
            (left.clone(), right.clone())
        };
        let fields = left
            .fields()
            .iter()
            .chain(right.fields().iter())
            .cloned()
            .collect_vec();
        Ok(Schema::new(fields)?)
    }

    fn payload_eq(&self, other: &Self) -> bool {
        self.condition == other.condition
            && self.window == other.window
            && self.strategy == other.strategy
    }
}

impl OperatorConcept for JoinOperator {
    impl_operator_common!(JoinOperator, "Join");

    fn explain(&self, verbosity: ExplainVerbosity) -> String {
        match verbosity {
            ExplainVerbosity::Short => format!("Join({})", self.condition.explain()),
            ExplainVerbosity::Debug => format!(
                "Join({} strategy={} window={:?})",
                self.condition.explain(),
                self.strategy,
                self.window.window
            ),
        }
    }

    fn infer_output_schema(&self, child_schemas: &[Schema]) -> Result<LogicalOperator> {
        expect_children("Join", 2, child_schemas)?;
        let output = Self::combined_schema(&child_schemas[0], &child_schemas[1])?;
        let condition = self.condition.with_inferred_stamp(&output)?;
        if condition.stamp() != Some(DataType::Bool) {
            return Err(PlanError::UnexpectedStamp {
                context: self.explain(ExplainVerbosity::Short),
                expected: DataType::Bool,
                actual: condition.stamp(),
            });
        }
        let mut copy = self.clone();
        copy.condition = condition;
        copy.traits.insert(OutputSchemaTrait(output));
        Ok(LogicalOperator::new(copy))
    }

    fn serialize(&self) -> rill_pb::PbLogicalOperator {
        let mut attributes = HashMap::new();
        attributes.insert("strategy".to_owned(), self.strategy.to_string());
        attributes.insert("window".to_owned(), format!("{:?}", self.window));
        pb_operator(self, vec![self.condition.serialize()], attributes)
    }
}
