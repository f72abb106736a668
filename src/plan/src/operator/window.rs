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
use rill_common::catalog::{Field, Schema};
use rill_common::ids::OperatorId;
use rill_common::types::DataType;

use super::{
    expect_children, impl_operator_common, pb_operator, ExplainVerbosity, LogicalOperator,
    OperatorConcept,
};
use crate::error::{PlanError, Result};
use crate::traits::{OutputSchemaTrait, TraitSet};
use crate::window::{TimeCharacteristic, WindowSpec};

/// The closed family of aggregation functions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggregationKind {
    Sum,
    Count,
    Min,
    Max,
    Avg,
}

impl std::fmt::Display for AggregationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AggregationKind::Sum => "Sum",
            AggregationKind::Count => "Count",
            AggregationKind::Min => "Min",
            AggregationKind::Max => "Max",
            AggregationKind::Avg => "Avg",
        };
        write!(f, "{name}")
    }
}

/// One aggregation of a windowed operator: `kind(field) as as_name`.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregationDescriptor {
    pub kind: AggregationKind,
    pub field: String,
    pub as_name: String,
}

impl AggregationDescriptor {
    pub fn new(
        kind: AggregationKind,
        field: impl Into<String>,
        as_name: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            field: field.into(),
            as_name: as_name.into(),
        }
    }

    /// The result type for an input field of `input` type. Sums widen to the
    /// 64-bit type of the input's class to keep long windows from
    /// overflowing.
    pub fn result_type(&self, input: DataType) -> Result<DataType> {
        if !input.is_numeric() {
            return Err(PlanError::TypeMismatch {
                context: format!("{}({})", self.kind, self.field),
                lhs: input,
                rhs: DataType::Int64,
            });
        }
        Ok(match self.kind {
            AggregationKind::Count => DataType::UInt64,
            AggregationKind::Avg => DataType::Float64,
            AggregationKind::Min | AggregationKind::Max => input,
            AggregationKind::Sum => {
                if input.is_float() {
                    DataType::Float64
                } else if input.is_signed() {
                    DataType::Int64
                } else {
                    DataType::UInt64
                }
            }
        })
    }
}

/// The output schema shared by windowed aggregation and its distributed
/// split: window bounds, key fields, one field per aggregation.
pub(crate) fn window_aggregation_schema(
    input: &Schema,
    keys: &[String],
    aggregations: &[AggregationDescriptor],
) -> Result<Schema> {
    let mut fields = vec![
        Field::new("window_start", DataType::UInt64),
        Field::new("window_end", DataType::UInt64),
    ];
    for key in keys {
        let field = input
            .get_field(key)
            .map_err(|_| PlanError::FieldNotFound(key.clone()))?;
        fields.push(field.clone());
    }
    for agg in aggregations {
        let input_type = input
            .get_field(&agg.field)
            .map_err(|_| PlanError::FieldNotFound(agg.field.clone()))?
            .data_type;
        fields.push(Field::new(agg.as_name.clone(), agg.result_type(input_type)?));
    }
    Ok(Schema::new(fields)?)
}

macro_rules! windowed_aggregation_like {
    ($(#[$attr:meta])* $type:ident, $kind:literal) => {
        $(#[$attr])*
        #[derive(Clone, Debug)]
        pub struct $type {
            id: OperatorId,
            children: Vec<LogicalOperator>,
            traits: TraitSet,
            window: WindowSpec,
            keys: Vec<String>,
            aggregations: Vec<AggregationDescriptor>,
        }

        impl $type {
            pub fn new(
                window: WindowSpec,
                keys: Vec<String>,
                aggregations: Vec<AggregationDescriptor>,
            ) -> Self {
                Self {
                    id: OperatorId::generate(),
                    children: vec![],
                    traits: TraitSet::new(),
                    window,
                    keys,
                    aggregations,
                }
            }

            pub fn window(&self) -> &WindowSpec {
                &self.window
            }

            pub fn keys(&self) -> &[String] {
                &self.keys
            }

            pub fn aggregations(&self) -> &[AggregationDescriptor] {
                &self.aggregations
            }

            fn payload_eq(&self, other: &Self) -> bool {
                self.window == other.window
                    && self.keys == other.keys
                    && self.aggregations == other.aggregations
            }

            fn explain_aggregations(&self) -> String {
                self.aggregations
                    .iter()
                    .map(|a| format!("{}({})", a.kind, a.field))
                    .join(", ")
            }

            fn serialize_common(&self) -> rill_pb::PbLogicalOperator {
                let mut attributes = HashMap::new();
                attributes.insert("window".to_owned(), format!("{:?}", self.window));
                attributes.insert("keys".to_owned(), self.keys.join(","));
                attributes.insert(
                    "aggregations".to_owned(),
                    self.aggregations
                        .iter()
                        .map(|a| format!("{}:{}:{}", a.kind, a.field, a.as_name))
                        .join(","),
                );
                pb_operator(self, vec![], attributes)
            }
        }
    };
}

windowed_aggregation_like!(
    /// A keyed aggregation over event- or ingestion-time windows.
    WindowedAggregationOperator,
    "WindowedAggregation"
);

impl OperatorConcept for WindowedAggregationOperator {
    impl_operator_common!(WindowedAggregationOperator, "WindowedAggregation");

    fn explain(&self, _verbosity: ExplainVerbosity) -> String {
        format!(
            "WindowedAggregation(by [{}] {})",
            self.keys.join(", "),
            self.explain_aggregations()
        )
    }

    fn infer_output_schema(&self, child_schemas: &[Schema]) -> Result<LogicalOperator> {
        expect_children("WindowedAggregation", 1, child_schemas)?;
        let output = window_aggregation_schema(&child_schemas[0], &self.keys, &self.aggregations)?;
        let traits = self.trait_set().with(OutputSchemaTrait(output));
        Ok(self.with_trait_set(traits))
    }

    fn serialize(&self) -> rill_pb::PbLogicalOperator {
        self.serialize_common()
    }
}

windowed_aggregation_like!(
    /// The per-source half of a distributed window: builds pre-aggregated
    /// slices close to each source.
    SliceCreationOperator,
    "SliceCreation"
);

impl OperatorConcept for SliceCreationOperator {
    impl_operator_common!(SliceCreationOperator, "SliceCreation");

    fn explain(&self, _verbosity: ExplainVerbosity) -> String {
        format!(
            "SliceCreation(by [{}] {})",
            self.keys.join(", "),
            self.explain_aggregations()
        )
    }

    fn infer_output_schema(&self, child_schemas: &[Schema]) -> Result<LogicalOperator> {
        expect_children("SliceCreation", 1, child_schemas)?;
        let output = window_aggregation_schema(&child_schemas[0], &self.keys, &self.aggregations)?;
        let traits = self.trait_set().with(OutputSchemaTrait(output));
        Ok(self.with_trait_set(traits))
    }

    fn serialize(&self) -> rill_pb::PbLogicalOperator {
        self.serialize_common()
    }
}

windowed_aggregation_like!(
    /// The central half of a distributed window: combines pre-aggregated
    /// slices from every source into final window results.
    WindowComputationOperator,
    "WindowComputation"
);

impl OperatorConcept for WindowComputationOperator {
    impl_operator_common!(WindowComputationOperator, "WindowComputation");

    fn explain(&self, _verbosity: ExplainVerbosity) -> String {
        format!(
            "WindowComputation(by [{}] {})",
            self.keys.join(", "),
            self.explain_aggregations()
        )
    }

    fn infer_output_schema(&self, child_schemas: &[Schema]) -> Result<LogicalOperator> {
        // Inputs are pre-aggregated slices that already carry the output
        // shape; combining does not change it.
        let first = child_schemas
            .first()
            .ok_or(PlanError::WrongNumberOfChildren {
                kind: "WindowComputation",
                expected: 1,
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
        self.serialize_common()
    }
}

/// Stamps watermarks onto passing buffers according to a time
/// characteristic.
#[derive(Clone, Debug)]
pub struct WatermarkAssignerOperator {
    id: OperatorId,
    children: Vec<LogicalOperator>,
    traits: TraitSet,
    time: TimeCharacteristic,
}

impl WatermarkAssignerOperator {
    pub fn new(time: TimeCharacteristic) -> Self {
        Self {
            id: OperatorId::generate(),
            children: vec![],
            traits: TraitSet::new(),
            time,
        }
    }

    pub fn time(&self) -> &TimeCharacteristic {
        &self.time
    }

    fn payload_eq(&self, other: &Self) -> bool {
        self.time == other.time
    }
}

impl OperatorConcept for WatermarkAssignerOperator {
    impl_operator_common!(WatermarkAssignerOperator, "WatermarkAssigner");

    fn explain(&self, _verbosity: ExplainVerbosity) -> String {
        format!("WatermarkAssigner({:?})", self.time)
    }

    fn infer_output_schema(&self, child_schemas: &[Schema]) -> Result<LogicalOperator> {
        expect_children("WatermarkAssigner", 1, child_schemas)?;
        if let TimeCharacteristic::EventTime { field, .. } = &self.time {
            child_schemas[0]
                .get_field(field)
                .map_err(|_| PlanError::FieldNotFound(field.clone()))?;
        }
        let traits = self
            .trait_set()
            .with(OutputSchemaTrait(child_schemas[0].clone()));
        Ok(self.with_trait_set(traits))
    }

    fn serialize(&self) -> rill_pb::PbLogicalOperator {
        let mut attributes = HashMap::new();
        attributes.insert("time".to_owned(), format!("{:?}", self.time));
        pb_operator(self, vec![], attributes)
    }
}
