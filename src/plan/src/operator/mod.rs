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

//! Logical operators.
//!
//! [`LogicalOperator`] is the type-erased, immutable node of the plan DAG.
//! Concrete kinds implement [`OperatorConcept`]; downcasting is explicit via
//! [`LogicalOperator::try_get`]. Local equality covers kind, payload and
//! trait set; children are compared by the plan-level traversal, not here.

mod join;
mod relational;
mod sink;
mod source;
mod window;

use std::any::Any;
use std::sync::Arc;

use rill_common::catalog::Schema;
use rill_common::ids::{OperatorId, WorkerId};
use rill_pb::PbLogicalOperator;

pub use join::{JoinOperator, JoinStrategy};
pub use relational::{FilterOperator, MapOperator, ProjectionOperator, UnionOperator};
pub use sink::SinkOperator;
pub use source::SourceOperator;
pub use window::{
    AggregationDescriptor, AggregationKind, SliceCreationOperator, WatermarkAssignerOperator,
    WindowComputationOperator, WindowedAggregationOperator,
};

use crate::error::{PlanError, Result};
use crate::traits::{OutputSchemaTrait, PlacementTrait, TraitSet};

/// How much detail an explain string carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExplainVerbosity {
    Short,
    Debug,
}

/// The interface every operator kind implements.
pub trait OperatorConcept: Send + Sync + std::fmt::Debug + 'static {
    fn id(&self) -> OperatorId;

    /// The kind tag, e.g. `Source` or `WindowedAggregation`.
    fn kind(&self) -> &'static str;

    fn children(&self) -> Vec<LogicalOperator>;

    /// Returns a copy with the given children; the id is preserved.
    fn with_children(&self, children: Vec<LogicalOperator>) -> LogicalOperator;

    /// Returns a copy under a freshly generated id. Used when a rewrite
    /// duplicates a subtree and must keep ids unique.
    fn with_new_id(&self) -> LogicalOperator;

    fn trait_set(&self) -> TraitSet;

    fn with_trait_set(&self, traits: TraitSet) -> LogicalOperator;

    fn explain(&self, verbosity: ExplainVerbosity) -> String;

    /// Computes the output schema from the child schemas, stamps payload
    /// functions and attaches an [`OutputSchemaTrait`].
    fn infer_output_schema(&self, child_schemas: &[Schema]) -> Result<LogicalOperator>;

    fn serialize(&self) -> PbLogicalOperator;

    /// Local equality: kind, payload and trait set. Children and id are
    /// deliberately excluded.
    fn equals(&self, other: &dyn OperatorConcept) -> bool;

    fn as_any(&self) -> &dyn Any;
}

/// A type-erased, immutable logical operator with value semantics.
#[derive(Clone, Debug)]
pub struct LogicalOperator {
    inner: Arc<dyn OperatorConcept>,
}

impl LogicalOperator {
    pub fn new<T: OperatorConcept>(node: T) -> Self {
        Self {
            inner: Arc::new(node),
        }
    }

    pub fn try_get<T: OperatorConcept>(&self) -> Option<&T> {
        self.inner.as_any().downcast_ref::<T>()
    }

    pub fn get<T: OperatorConcept>(&self) -> Result<&T> {
        self.try_get::<T>()
            .ok_or_else(|| PlanError::InvalidDynamicCast {
                requested: std::any::type_name::<T>(),
                stored: self.inner.kind(),
            })
    }

    pub fn id(&self) -> OperatorId {
        self.inner.id()
    }

    pub fn kind(&self) -> &'static str {
        self.inner.kind()
    }

    pub fn children(&self) -> Vec<LogicalOperator> {
        self.inner.children()
    }

    pub fn with_children(&self, children: Vec<LogicalOperator>) -> LogicalOperator {
        self.inner.with_children(children)
    }

    pub fn with_new_id(&self) -> LogicalOperator {
        self.inner.with_new_id()
    }

    pub fn trait_set(&self) -> TraitSet {
        self.inner.trait_set()
    }

    pub fn with_trait_set(&self, traits: TraitSet) -> LogicalOperator {
        self.inner.with_trait_set(traits)
    }

    pub fn explain(&self, verbosity: ExplainVerbosity) -> String {
        self.inner.explain(verbosity)
    }

    pub fn infer_output_schema(&self, child_schemas: &[Schema]) -> Result<LogicalOperator> {
        self.inner.infer_output_schema(child_schemas)
    }

    pub fn serialize(&self) -> PbLogicalOperator {
        self.inner.serialize()
    }

    /// The inferred output schema, once type inference has run.
    pub fn output_schema(&self) -> Option<Schema> {
        self.trait_set().get::<OutputSchemaTrait>().map(|t| t.0.clone())
    }

    /// The assigned worker, once placement has run.
    pub fn placement(&self) -> Option<WorkerId> {
        self.trait_set().get::<PlacementTrait>().map(|t| t.0)
    }
}

impl PartialEq for LogicalOperator {
    fn eq(&self, other: &Self) -> bool {
        self.inner.equals(other.inner.as_ref())
    }
}

impl std::fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.explain(ExplainVerbosity::Short))
    }
}

pub(crate) fn expect_children(
    kind: &'static str,
    expected: usize,
    child_schemas: &[Schema],
) -> Result<()> {
    if child_schemas.len() != expected {
        return Err(PlanError::WrongNumberOfChildren {
            kind,
            expected,
            actual: child_schemas.len(),
        });
    }
    Ok(())
}

pub(crate) fn pb_operator(
    op: &dyn OperatorConcept,
    functions: Vec<rill_pb::PbFunction>,
    attributes: std::collections::HashMap<String, String>,
) -> PbLogicalOperator {
    let traits = op.trait_set();
    PbLogicalOperator {
        operator_id: op.id().raw(),
        kind: op.kind().to_owned(),
        children: op.children().iter().map(|c| c.serialize()).collect(),
        functions,
        output_schema: traits.get::<OutputSchemaTrait>().map(|t| rill_pb::PbSchema {
            fields: t
                .0
                .fields()
                .iter()
                .map(|f| rill_pb::PbField {
                    name: f.name.clone(),
                    data_type: f.data_type.to_string(),
                })
                .collect(),
        }),
        placement_worker_id: traits.get::<PlacementTrait>().map(|t| t.0.raw()),
        attributes,
    }
}

macro_rules! impl_operator_common {
    ($type:ty, $kind:literal) => {
        fn id(&self) -> rill_common::ids::OperatorId {
            self.id
        }

        fn kind(&self) -> &'static str {
            $kind
        }

        fn children(&self) -> Vec<LogicalOperator> {
            self.children.clone()
        }

        fn with_children(&self, children: Vec<LogicalOperator>) -> LogicalOperator {
            let mut copy = self.clone();
            copy.children = children;
            LogicalOperator::new(copy)
        }

        fn with_new_id(&self) -> LogicalOperator {
            let mut copy = self.clone();
            copy.id = rill_common::ids::OperatorId::generate();
            LogicalOperator::new(copy)
        }

        fn trait_set(&self) -> crate::traits::TraitSet {
            self.traits.clone()
        }

        fn with_trait_set(&self, traits: crate::traits::TraitSet) -> LogicalOperator {
            let mut copy = self.clone();
            copy.traits = traits;
            LogicalOperator::new(copy)
        }

        fn equals(&self, other: &dyn OperatorConcept) -> bool {
            other
                .as_any()
                .downcast_ref::<$type>()
                .map_or(false, |o| self.payload_eq(o) && self.traits == o.traits)
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    };
}

pub(crate) use impl_operator_common;
