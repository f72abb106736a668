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

//! The immutable expression DAG attached to operators.
//!
//! [`Function`] is a value-semantic, type-erased wrapper over a closed family
//! of expression nodes. Nodes are immutable: every `with_*` operation returns
//! a new value. Stamps (result data types) start unset and are filled in by
//! [`Function::with_inferred_stamp`] against an input schema.

mod kinds;

use std::any::Any;
use std::sync::Arc;

use rill_common::catalog::Schema;
use rill_common::types::{DataType, VarVal};
use rill_pb::PbFunction;

pub use kinds::{
    ArithmeticFunction, ArithmeticOp, ComparisonFunction, ComparisonOp, ConstantFunction,
    FieldAccessFunction, LogicalFunction, LogicalOp, NullFunction,
};

use crate::error::{PlanError, Result};

/// The interface every expression node implements.
pub trait FunctionConcept: Send + Sync + std::fmt::Debug + 'static {
    /// A string rendering for plan explains.
    fn explain(&self) -> String;

    /// The inferred result type; `None` before inference.
    fn stamp(&self) -> Option<DataType>;

    /// Infers stamps bottom-up against `schema` and returns the stamped node.
    fn with_inferred_stamp(&self, schema: &Schema) -> Result<Function>;

    fn children(&self) -> Vec<Function>;

    fn with_children(&self, children: Vec<Function>) -> Result<Function>;

    /// The kind tag, e.g. `FieldAccess` or `Equals`.
    fn function_type(&self) -> &'static str;

    fn serialize(&self) -> PbFunction;

    fn equals(&self, other: &dyn FunctionConcept) -> bool;

    fn as_any(&self) -> &dyn Any;
}

/// A type-erased, immutable expression node with value semantics.
#[derive(Clone, Debug)]
pub struct Function {
    inner: Arc<dyn FunctionConcept>,
}

impl Function {
    pub fn new<T: FunctionConcept>(node: T) -> Self {
        Self {
            inner: Arc::new(node),
        }
    }

    /// Attempts to view the underlying node as `T`.
    pub fn try_get<T: FunctionConcept>(&self) -> Option<&T> {
        self.inner.as_any().downcast_ref::<T>()
    }

    /// Views the underlying node as `T`, failing with a typed error.
    pub fn get<T: FunctionConcept>(&self) -> Result<&T> {
        self.try_get::<T>()
            .ok_or_else(|| PlanError::InvalidDynamicCast {
                requested: std::any::type_name::<T>(),
                stored: self.inner.function_type(),
            })
    }

    pub fn explain(&self) -> String {
        self.inner.explain()
    }

    pub fn stamp(&self) -> Option<DataType> {
        self.inner.stamp()
    }

    /// The inferred stamp, failing when inference has not run yet.
    pub fn stamp_or_err(&self) -> Result<DataType> {
        self.stamp()
            .ok_or_else(|| PlanError::StampNotInferred(self.explain()))
    }

    pub fn with_inferred_stamp(&self, schema: &Schema) -> Result<Function> {
        self.inner.with_inferred_stamp(schema)
    }

    pub fn children(&self) -> Vec<Function> {
        self.inner.children()
    }

    pub fn with_children(&self, children: Vec<Function>) -> Result<Function> {
        self.inner.with_children(children)
    }

    pub fn function_type(&self) -> &'static str {
        self.inner.function_type()
    }

    pub fn serialize(&self) -> PbFunction {
        self.inner.serialize()
    }
}

impl Default for Function {
    /// The uninhabited slot: legal to hold, an error to use.
    fn default() -> Self {
        Function::new(NullFunction)
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        self.inner.equals(other.inner.as_ref())
    }
}

impl std::fmt::Display for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.explain())
    }
}

/// Reads the named field of the input record.
pub fn field(name: impl Into<String>) -> Function {
    Function::new(FieldAccessFunction::new(name))
}

/// A literal value.
pub fn constant(value: VarVal) -> Function {
    Function::new(ConstantFunction::new(value))
}

macro_rules! binary_ctor {
    ($(#[$attr:meta])* $name:ident, $node:ident, $op:expr) => {
        $(#[$attr])*
        pub fn $name(lhs: Function, rhs: Function) -> Function {
            Function::new($node::new($op, lhs, rhs))
        }
    };
}

binary_ctor!(add, ArithmeticFunction, ArithmeticOp::Add);
binary_ctor!(sub, ArithmeticFunction, ArithmeticOp::Sub);
binary_ctor!(mul, ArithmeticFunction, ArithmeticOp::Mul);
binary_ctor!(div, ArithmeticFunction, ArithmeticOp::Div);
binary_ctor!(equals, ComparisonFunction, ComparisonOp::Equals);
binary_ctor!(not_equals, ComparisonFunction, ComparisonOp::NotEquals);
binary_ctor!(less_than, ComparisonFunction, ComparisonOp::LessThan);
binary_ctor!(less_equals, ComparisonFunction, ComparisonOp::LessEquals);
binary_ctor!(greater_than, ComparisonFunction, ComparisonOp::GreaterThan);
binary_ctor!(
    greater_equals,
    ComparisonFunction,
    ComparisonOp::GreaterEquals
);

pub fn and(lhs: Function, rhs: Function) -> Function {
    Function::new(LogicalFunction::binary(LogicalOp::And, lhs, rhs))
}

pub fn or(lhs: Function, rhs: Function) -> Function {
    Function::new(LogicalFunction::binary(LogicalOp::Or, lhs, rhs))
}

pub fn negate(input: Function) -> Function {
    Function::new(LogicalFunction::unary(LogicalOp::Negate, input))
}

#[cfg(test)]
mod tests {
    use rill_common::catalog::Field;

    use super::*;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::UInt32),
            Field::new("value", DataType::Int64),
        ])
        .unwrap()
    }

    #[test]
    fn inference_stamps_bottom_up() {
        let predicate = and(
            greater_than(field("value"), constant(VarVal::Int32(5))),
            equals(field("id"), constant(VarVal::UInt32(1))),
        );
        assert_eq!(predicate.stamp(), None);

        let stamped = predicate.with_inferred_stamp(&schema()).unwrap();
        assert_eq!(stamped.stamp(), Some(DataType::Bool));

        let comparison = &stamped.children()[0];
        assert_eq!(comparison.stamp(), Some(DataType::Bool));
        // value: Int64 joined with the Int32 literal
        assert_eq!(comparison.children()[0].stamp(), Some(DataType::Int64));
    }

    #[test]
    fn inference_fails_on_unknown_field() {
        let err = field("missing")
            .with_inferred_stamp(&schema())
            .unwrap_err();
        assert!(matches!(err, PlanError::FieldNotFound(name) if name == "missing"));
    }

    #[test]
    fn logical_function_requires_boolean_children() {
        let bad = and(field("id"), constant(VarVal::Bool(true)));
        assert!(matches!(
            bad.with_inferred_stamp(&schema()),
            Err(PlanError::UnexpectedStamp { .. })
        ));
    }

    #[test]
    fn structural_equality_ignores_sharing() {
        let a = add(field("id"), constant(VarVal::Int32(1)));
        let b = add(field("id"), constant(VarVal::Int32(1)));
        assert_eq!(a, b);
        assert_ne!(a, add(field("id"), constant(VarVal::Int32(2))));
    }

    #[test]
    fn null_function_errors_on_every_operation() {
        let null = Function::default();
        assert!(null.with_inferred_stamp(&schema()).is_err());
        assert!(null.with_children(vec![]).is_err());
        assert_eq!(null.stamp(), None);
    }

    #[test]
    fn downcasts_are_typed() {
        let f = field("id");
        assert!(f.try_get::<FieldAccessFunction>().is_some());
        assert!(matches!(
            f.get::<ConstantFunction>(),
            Err(PlanError::InvalidDynamicCast { .. })
        ));
    }

    #[test]
    fn serialization_captures_the_tree() {
        let stamped = equals(field("id"), constant(VarVal::UInt32(3)))
            .with_inferred_stamp(&schema())
            .unwrap();
        let pb = stamped.serialize();
        assert_eq!(pb.function_type, "Equals");
        assert_eq!(pb.stamp, "BOOL");
        assert_eq!(pb.children.len(), 2);
        assert_eq!(pb.children[0].field_name.as_deref(), Some("id"));
        assert_eq!(pb.children[1].constant_value.as_deref(), Some("3"));
    }
}
