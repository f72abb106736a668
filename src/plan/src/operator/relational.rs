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

use rill_common::catalog::{Field, Schema};
use rill_common::ids::OperatorId;
use rill_common::types::DataType;

use super::{
    expect_children, impl_operator_common, pb_operator, ExplainVerbosity, LogicalOperator,
    OperatorConcept,
};
use crate::error::{PlanError, Result};
use crate::function::Function;
use crate::traits::{OutputSchemaTrait, TraitSet};

/// Drops records whose predicate evaluates to false.
#[derive(Clone, Debug)]
pub struct FilterOperator {
    id: OperatorId,
    children: Vec<LogicalOperator>,
    traits: TraitSet,
    predicate: Function,
    selectivity: f64,
}

impl FilterOperator {
    pub fn new(predicate: Function) -> Self {
        Self {
            id: OperatorId::generate(),
            children: vec![],
            traits: TraitSet::new(),
            predicate,
            selectivity: 1.0,
        }
    }

    /// The estimated fraction of records passing the predicate, used by
    /// predicate reordering. Defaults to 1.0 (no information).
    pub fn with_selectivity(mut self, selectivity: f64) -> Self {
        self.selectivity = selectivity;
        self
    }

    pub fn predicate(&self) -> &Function {
        &self.predicate
    }

    pub fn selectivity(&self) -> f64 {
        self.selectivity
    }

    fn payload_eq(&self, other: &Self) -> bool {
        self.predicate == other.predicate && self.selectivity == other.selectivity
    }
}

impl OperatorConcept for FilterOperator {
    impl_operator_common!(FilterOperator, "Filter");

    fn explain(&self, verbosity: ExplainVerbosity) -> String {
        match verbosity {
            ExplainVerbosity::Short => format!("Filter({})", self.predicate.explain()),
            ExplainVerbosity::Debug => format!(
                "Filter({} selectivity={})",
                self.predicate.explain(),
                self.selectivity
            ),
        }
    }

    fn infer_output_schema(&self, child_schemas: &[Schema]) -> Result<LogicalOperator> {
        expect_children("Filter", 1, child_schemas)?;
        let predicate = self.predicate.with_inferred_stamp(&child_schemas[0])?;
        if predicate.stamp() != Some(DataType::Bool) {
            return Err(PlanError::UnexpectedStamp {
                context: self.explain(ExplainVerbosity::Short),
                expected: DataType::Bool,
                actual: predicate.stamp(),
            });
        }
        let mut copy = self.clone();
        copy.predicate = predicate;
        copy.traits
            .insert(OutputSchemaTrait(child_schemas[0].clone()));
        Ok(LogicalOperator::new(copy))
    }

    fn serialize(&self) -> rill_pb::PbLogicalOperator {
        let mut attributes = HashMap::new();
        attributes.insert("selectivity".to_owned(), self.selectivity.to_string());
        pb_operator(self, vec![self.predicate.serialize()], attributes)
    }
}

/// Writes the result of an expression into a field: replacing it when the
/// name exists, appending it otherwise.
#[derive(Clone, Debug)]
pub struct MapOperator {
    id: OperatorId,
    children: Vec<LogicalOperator>,
    traits: TraitSet,
    assignment_field: String,
    expression: Function,
}

impl MapOperator {
    pub fn new(assignment_field: impl Into<String>, expression: Function) -> Self {
        Self {
            id: OperatorId::generate(),
            children: vec![],
            traits: TraitSet::new(),
            assignment_field: assignment_field.into(),
            expression,
        }
    }

    pub fn assignment_field(&self) -> &str {
        &self.assignment_field
    }

    pub fn expression(&self) -> &Function {
        &self.expression
    }

    fn payload_eq(&self, other: &Self) -> bool {
        self.assignment_field == other.assignment_field && self.expression == other.expression
    }
}

impl OperatorConcept for MapOperator {
    impl_operator_common!(MapOperator, "Map");

    fn explain(&self, _verbosity: ExplainVerbosity) -> String {
        format!(
            "Map({} = {})",
            self.assignment_field,
            self.expression.explain()
        )
    }

    fn infer_output_schema(&self, child_schemas: &[Schema]) -> Result<LogicalOperator> {
        expect_children("Map", 1, child_schemas)?;
        let expression = self.expression.with_inferred_stamp(&child_schemas[0])?;
        let stamp = expression.stamp_or_err()?;

        let input = &child_schemas[0];
        let output = if input.contains(&self.assignment_field) {
            // Replacement keeps the field position, with the new type.
            Schema::new(
                input
                    .fields()
                    .iter()
                    .map(|f| {
                        if f.name == self.assignment_field {
                            Field::new(f.name.clone(), stamp)
                        } else {
                            f.clone()
                        }
                    })
                    .collect(),
            )?
            .with_layout_hint(input.layout_hint())
        } else {
            input.with_field_appended(Field::new(self.assignment_field.clone(), stamp))?
        };

        let mut copy = self.clone();
        copy.expression = expression;
        copy.traits.insert(OutputSchemaTrait(output));
        Ok(LogicalOperator::new(copy))
    }

    fn serialize(&self) -> rill_pb::PbLogicalOperator {
        let mut attributes = HashMap::new();
        attributes.insert(
            "assignment_field".to_owned(),
            self.assignment_field.clone(),
        );
        pb_operator(self, vec![self.expression.serialize()], attributes)
    }
}

/// Keeps the named fields, in the given order.
#[derive(Clone, Debug)]
pub struct ProjectionOperator {
    id: OperatorId,
    children: Vec<LogicalOperator>,
    traits: TraitSet,
    fields: Vec<String>,
}

impl ProjectionOperator {
    pub fn new(fields: Vec<String>) -> Self {
        Self {
            id: OperatorId::generate(),
            children: vec![],
            traits: TraitSet::new(),
            fields,
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    fn payload_eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl OperatorConcept for ProjectionOperator {
    impl_operator_common!(ProjectionOperator, "Projection");

    fn explain(&self, _verbosity: ExplainVerbosity) -> String {
        format!("Projection({})", self.fields.join(", "))
    }

    fn infer_output_schema(&self, child_schemas: &[Schema]) -> Result<LogicalOperator> {
        expect_children("Projection", 1, child_schemas)?;
        let input = &child_schemas[0];
        let fields = self
            .fields
            .iter()
            .map(|name| {
                input
                    .get_field(name)
                    .cloned()
                    .map_err(|_| PlanError::FieldNotFound(name.clone()))
            })
            .collect::<Result<Vec<_>>>()?;
        let output = Schema::new(fields)?.with_layout_hint(input.layout_hint());
        let traits = self.trait_set().with(OutputSchemaTrait(output));
        Ok(self.with_trait_set(traits))
    }

    fn serialize(&self) -> rill_pb::PbLogicalOperator {
        let mut attributes = HashMap::new();
        attributes.insert("fields".to_owned(), self.fields.join(","));
        pb_operator(self, vec![], attributes)
    }
}

/// Merges identically-typed inputs into one stream.
#[derive(Clone, Debug)]
pub struct UnionOperator {
    id: OperatorId,
    children: Vec<LogicalOperator>,
    traits: TraitSet,
}

impl UnionOperator {
    pub fn new() -> Self {
        Self {
            id: OperatorId::generate(),
            children: vec![],
            traits: TraitSet::new(),
        }
    }

    fn payload_eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Default for UnionOperator {
    fn default() -> Self {
        Self::new()
    }
}

impl OperatorConcept for UnionOperator {
    impl_operator_common!(UnionOperator, "Union");

    fn explain(&self, _verbosity: ExplainVerbosity) -> String {
        "Union".to_owned()
    }

    fn infer_output_schema(&self, child_schemas: &[Schema]) -> Result<LogicalOperator> {
        let first = child_schemas.first().ok_or(PlanError::WrongNumberOfChildren {
            kind: "Union",
            expected: 2,
            actual: 0,
        })?;
        for other in &child_schemas[1..] {
            if other.fields() != first.fields() {
                return Err(PlanError::IncompatibleSchemas(
                    first.to_string(),
                    other.to_string(),
                ));
            }
        }
        let traits = self.trait_set().with(OutputSchemaTrait(first.clone()));
        Ok(self.with_trait_set(traits))
    }

    fn serialize(&self) -> rill_pb::PbLogicalOperator {
        pb_operator(self, vec![], HashMap::new())
    }
}
