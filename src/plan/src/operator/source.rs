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

use rill_common::catalog::{Schema, SourceDescriptor};
use rill_common::ids::OperatorId;

use super::{
    expect_children, impl_operator_common, pb_operator, ExplainVerbosity, LogicalOperator,
    OperatorConcept,
};
use crate::error::Result;
use crate::traits::{OutputSchemaTrait, TraitSet};

/// A stream source leaf.
///
/// Before logical-source expansion the operator names a logical source; the
/// expansion rewrite replaces it with one operator per registered physical
/// source, each carrying the bound [`SourceDescriptor`].
#[derive(Clone, Debug)]
pub struct SourceOperator {
    id: OperatorId,
    children: Vec<LogicalOperator>,
    traits: TraitSet,
    logical_source_name: String,
    schema: Schema,
    descriptor: Option<SourceDescriptor>,
}

impl SourceOperator {
    /// An unbound reference to a logical source.
    pub fn logical(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            id: OperatorId::generate(),
            children: vec![],
            traits: TraitSet::new(),
            logical_source_name: name.into(),
            schema,
            descriptor: None,
        }
    }

    /// A leaf bound to one physical source.
    pub fn physical(descriptor: SourceDescriptor) -> Self {
        Self {
            id: OperatorId::generate(),
            children: vec![],
            traits: TraitSet::new(),
            logical_source_name: descriptor.logical_source.name.clone(),
            schema: descriptor.logical_source.schema.clone(),
            descriptor: Some(descriptor),
        }
    }

    pub fn logical_source_name(&self) -> &str {
        &self.logical_source_name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn descriptor(&self) -> Option<&SourceDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn is_expanded(&self) -> bool {
        self.descriptor.is_some()
    }

    fn payload_eq(&self, other: &Self) -> bool {
        self.logical_source_name == other.logical_source_name
            && self.schema == other.schema
            && self.descriptor == other.descriptor
    }
}

impl OperatorConcept for SourceOperator {
    impl_operator_common!(SourceOperator, "Source");

    fn explain(&self, verbosity: ExplainVerbosity) -> String {
        match (&self.descriptor, verbosity) {
            (Some(d), ExplainVerbosity::Debug) => format!(
                "Source({} physical={} worker={})",
                self.logical_source_name, d.physical_source_id, d.worker_id
            ),
            (Some(d), ExplainVerbosity::Short) => {
                format!("Source({}#{})", self.logical_source_name, d.physical_source_id)
            }
            (None, _) => format!("Source({})", self.logical_source_name),
        }
    }

    fn infer_output_schema(&self, child_schemas: &[Schema]) -> Result<LogicalOperator> {
        expect_children("Source", 0, child_schemas)?;
        let traits = self
            .trait_set()
            .with(OutputSchemaTrait(self.schema.clone()));
        Ok(self.with_trait_set(traits))
    }

    fn serialize(&self) -> rill_pb::PbLogicalOperator {
        let mut attributes = HashMap::new();
        attributes.insert(
            "logical_source".to_owned(),
            self.logical_source_name.clone(),
        );
        if let Some(descriptor) = &self.descriptor {
            attributes.insert(
                "physical_source_id".to_owned(),
                descriptor.physical_source_id.to_string(),
            );
            attributes.insert("source_type".to_owned(), descriptor.source_type.clone());
            attributes.insert("worker_id".to_owned(), descriptor.worker_id.to_string());
        }
        pb_operator(self, vec![], attributes)
    }
}
