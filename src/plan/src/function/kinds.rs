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

use std::any::Any;

use rill_common::catalog::Schema;
use rill_common::types::{DataType, VarVal};
use rill_pb::PbFunction;

use super::{Function, FunctionConcept};
use crate::error::{PlanError, Result};

macro_rules! impl_equals_and_any {
    ($type:ty) => {
        fn equals(&self, other: &dyn FunctionConcept) -> bool {
            other
                .as_any()
                .downcast_ref::<$type>()
                .map_or(false, |o| self == o)
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    };
}

fn pb_node(function_type: &str, stamp: Option<DataType>, children: &[Function]) -> PbFunction {
    PbFunction {
        function_type: function_type.to_owned(),
        stamp: stamp.map(|s| s.to_string()).unwrap_or_default(),
        children: children.iter().map(|c| c.serialize()).collect(),
        field_name: None,
        constant_value: None,
    }
}

fn render_literal(value: &VarVal) -> String {
    match value {
        VarVal::Bool(v) => v.to_string(),
        VarVal::Int8(v) => v.to_string(),
        VarVal::Int16(v) => v.to_string(),
        VarVal::Int32(v) => v.to_string(),
        VarVal::Int64(v) => v.to_string(),
        VarVal::UInt8(v) => v.to_string(),
        VarVal::UInt16(v) => v.to_string(),
        VarVal::UInt32(v) => v.to_string(),
        VarVal::UInt64(v) => v.to_string(),
        VarVal::Float32(v) => v.to_string(),
        VarVal::Float64(v) => v.to_string(),
        VarVal::Char(v) => (*v as char).to_string(),
        VarVal::VarSized(v) => String::from_utf8_lossy(&v.bytes).into_owned(),
    }
}

/// Reads one field of the input record.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldAccessFunction {
    field_name: String,
    stamp: Option<DataType>,
}

impl FieldAccessFunction {
    pub fn new(field_name: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            stamp: None,
        }
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }
}

impl FunctionConcept for FieldAccessFunction {
    fn explain(&self) -> String {
        self.field_name.clone()
    }

    fn stamp(&self) -> Option<DataType> {
        self.stamp
    }

    fn with_inferred_stamp(&self, schema: &Schema) -> Result<Function> {
        let field = schema
            .get_field(&self.field_name)
            .map_err(|_| PlanError::FieldNotFound(self.field_name.clone()))?;
        Ok(Function::new(Self {
            field_name: self.field_name.clone(),
            stamp: Some(field.data_type),
        }))
    }

    fn children(&self) -> Vec<Function> {
        vec![]
    }

    fn with_children(&self, children: Vec<Function>) -> Result<Function> {
        if !children.is_empty() {
            return Err(PlanError::WrongNumberOfChildren {
                kind: "FieldAccess",
                expected: 0,
                actual: children.len(),
            });
        }
        Ok(Function::new(self.clone()))
    }

    fn function_type(&self) -> &'static str {
        "FieldAccess"
    }

    fn serialize(&self) -> PbFunction {
        PbFunction {
            field_name: Some(self.field_name.clone()),
            ..pb_node(self.function_type(), self.stamp, &[])
        }
    }

    impl_equals_and_any!(FieldAccessFunction);
}

/// A literal value; stamped at construction.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstantFunction {
    value: VarVal,
}

impl ConstantFunction {
    pub fn new(value: VarVal) -> Self {
        Self { value }
    }

    pub fn value(&self) -> &VarVal {
        &self.value
    }
}

impl FunctionConcept for ConstantFunction {
    fn explain(&self) -> String {
        render_literal(&self.value)
    }

    fn stamp(&self) -> Option<DataType> {
        Some(self.value.data_type())
    }

    fn with_inferred_stamp(&self, _schema: &Schema) -> Result<Function> {
        Ok(Function::new(self.clone()))
    }

    fn children(&self) -> Vec<Function> {
        vec![]
    }

    fn with_children(&self, children: Vec<Function>) -> Result<Function> {
        if !children.is_empty() {
            return Err(PlanError::WrongNumberOfChildren {
                kind: "Constant",
                expected: 0,
                actual: children.len(),
            });
        }
        Ok(Function::new(self.clone()))
    }

    fn function_type(&self) -> &'static str {
        "Constant"
    }

    fn serialize(&self) -> PbFunction {
        PbFunction {
            constant_value: Some(render_literal(&self.value)),
            ..pb_node(self.function_type(), self.stamp(), &[])
        }
    }

    impl_equals_and_any!(ConstantFunction);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithmeticOp {
    fn symbol(&self) -> &'static str {
        match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Sub => "-",
            ArithmeticOp::Mul => "*",
            ArithmeticOp::Div => "/",
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ArithmeticOp::Add => "Add",
            ArithmeticOp::Sub => "Sub",
            ArithmeticOp::Mul => "Mul",
            ArithmeticOp::Div => "Div",
        }
    }
}

/// A binary arithmetic node; the stamp is the numeric join of its children.
#[derive(Clone, Debug, PartialEq)]
pub struct ArithmeticFunction {
    op: ArithmeticOp,
    children: Vec<Function>,
    stamp: Option<DataType>,
}

impl ArithmeticFunction {
    pub fn new(op: ArithmeticOp, lhs: Function, rhs: Function) -> Self {
        Self {
            op,
            children: vec![lhs, rhs],
            stamp: None,
        }
    }

    pub fn op(&self) -> ArithmeticOp {
        self.op
    }
}

impl FunctionConcept for ArithmeticFunction {
    fn explain(&self) -> String {
        format!(
            "({} {} {})",
            self.children[0].explain(),
            self.op.symbol(),
            self.children[1].explain()
        )
    }

    fn stamp(&self) -> Option<DataType> {
        self.stamp
    }

    fn with_inferred_stamp(&self, schema: &Schema) -> Result<Function> {
        let lhs = self.children[0].with_inferred_stamp(schema)?;
        let rhs = self.children[1].with_inferred_stamp(schema)?;
        let stamp = lhs
            .stamp_or_err()?
            .join(&rhs.stamp_or_err()?)
            .map_err(|_| PlanError::TypeMismatch {
                context: self.explain(),
                lhs: lhs.stamp().unwrap_or(DataType::Bool),
                rhs: rhs.stamp().unwrap_or(DataType::Bool),
            })?;
        Ok(Function::new(Self {
            op: self.op,
            children: vec![lhs, rhs],
            stamp: Some(stamp),
        }))
    }

    fn children(&self) -> Vec<Function> {
        self.children.clone()
    }

    fn with_children(&self, children: Vec<Function>) -> Result<Function> {
        if children.len() != 2 {
            return Err(PlanError::WrongNumberOfChildren {
                kind: self.op.name(),
                expected: 2,
                actual: children.len(),
            });
        }
        Ok(Function::new(Self {
            op: self.op,
            children,
            stamp: self.stamp,
        }))
    }

    fn function_type(&self) -> &'static str {
        self.op.name()
    }

    fn serialize(&self) -> PbFunction {
        pb_node(self.function_type(), self.stamp, &self.children)
    }

    impl_equals_and_any!(ArithmeticFunction);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComparisonOp {
    Equals,
    NotEquals,
    LessThan,
    LessEquals,
    GreaterThan,
    GreaterEquals,
}

impl ComparisonOp {
    fn symbol(&self) -> &'static str {
        match self {
            ComparisonOp::Equals => "==",
            ComparisonOp::NotEquals => "!=",
            ComparisonOp::LessThan => "<",
            ComparisonOp::LessEquals => "<=",
            ComparisonOp::GreaterThan => ">",
            ComparisonOp::GreaterEquals => ">=",
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ComparisonOp::Equals => "Equals",
            ComparisonOp::NotEquals => "NotEquals",
            ComparisonOp::LessThan => "LessThan",
            ComparisonOp::LessEquals => "LessEquals",
            ComparisonOp::GreaterThan => "GreaterThan",
            ComparisonOp::GreaterEquals => "GreaterEquals",
        }
    }
}

/// A binary comparison node; stamps to `Bool` when its children are
/// comparable.
#[derive(Clone, Debug, PartialEq)]
pub struct ComparisonFunction {
    op: ComparisonOp,
    children: Vec<Function>,
    stamp: Option<DataType>,
}

impl ComparisonFunction {
    pub fn new(op: ComparisonOp, lhs: Function, rhs: Function) -> Self {
        Self {
            op,
            children: vec![lhs, rhs],
            stamp: None,
        }
    }

    pub fn op(&self) -> ComparisonOp {
        self.op
    }
}

impl FunctionConcept for ComparisonFunction {
    fn explain(&self) -> String {
        format!(
            "({} {} {})",
            self.children[0].explain(),
            self.op.symbol(),
            self.children[1].explain()
        )
    }

    fn stamp(&self) -> Option<DataType> {
        self.stamp
    }

    fn with_inferred_stamp(&self, schema: &Schema) -> Result<Function> {
        let lhs = self.children[0].with_inferred_stamp(schema)?;
        let rhs = self.children[1].with_inferred_stamp(schema)?;
        let (lt, rt) = (lhs.stamp_or_err()?, rhs.stamp_or_err()?);
        if lt != rt && lt.join(&rt).is_err() {
            return Err(PlanError::TypeMismatch {
                context: self.explain(),
                lhs: lt,
                rhs: rt,
            });
        }
        Ok(Function::new(Self {
            op: self.op,
            children: vec![lhs, rhs],
            stamp: Some(DataType::Bool),
        }))
    }

    fn children(&self) -> Vec<Function> {
        self.children.clone()
    }

    fn with_children(&self, children: Vec<Function>) -> Result<Function> {
        if children.len() != 2 {
            return Err(PlanError::WrongNumberOfChildren {
                kind: self.op.name(),
                expected: 2,
                actual: children.len(),
            });
        }
        Ok(Function::new(Self {
            op: self.op,
            children,
            stamp: self.stamp,
        }))
    }

    fn function_type(&self) -> &'static str {
        self.op.name()
    }

    fn serialize(&self) -> PbFunction {
        pb_node(self.function_type(), self.stamp, &self.children)
    }

    impl_equals_and_any!(ComparisonFunction);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Negate,
}

impl LogicalOp {
    fn name(&self) -> &'static str {
        match self {
            LogicalOp::And => "And",
            LogicalOp::Or => "Or",
            LogicalOp::Negate => "Negate",
        }
    }

    fn arity(&self) -> usize {
        match self {
            LogicalOp::Negate => 1,
            _ => 2,
        }
    }
}

/// A boolean connective over boolean children.
#[derive(Clone, Debug, PartialEq)]
pub struct LogicalFunction {
    op: LogicalOp,
    children: Vec<Function>,
    stamp: Option<DataType>,
}

impl LogicalFunction {
    pub fn binary(op: LogicalOp, lhs: Function, rhs: Function) -> Self {
        debug_assert_eq!(op.arity(), 2);
        Self {
            op,
            children: vec![lhs, rhs],
            stamp: None,
        }
    }

    pub fn unary(op: LogicalOp, input: Function) -> Self {
        debug_assert_eq!(op.arity(), 1);
        Self {
            op,
            children: vec![input],
            stamp: None,
        }
    }

    pub fn op(&self) -> LogicalOp {
        self.op
    }
}

impl FunctionConcept for LogicalFunction {
    fn explain(&self) -> String {
        match self.op {
            LogicalOp::And => format!(
                "({} && {})",
                self.children[0].explain(),
                self.children[1].explain()
            ),
            LogicalOp::Or => format!(
                "({} || {})",
                self.children[0].explain(),
                self.children[1].explain()
            ),
            LogicalOp::Negate => format!("!({})", self.children[0].explain()),
        }
    }

    fn stamp(&self) -> Option<DataType> {
        self.stamp
    }

    fn with_inferred_stamp(&self, schema: &Schema) -> Result<Function> {
        let children = self
            .children
            .iter()
            .map(|c| c.with_inferred_stamp(schema))
            .collect::<Result<Vec<_>>>()?;
        for child in &children {
            if child.stamp() != Some(DataType::Bool) {
                return Err(PlanError::UnexpectedStamp {
                    context: self.explain(),
                    expected: DataType::Bool,
                    actual: child.stamp(),
                });
            }
        }
        Ok(Function::new(Self {
            op: self.op,
            children,
            stamp: Some(DataType::Bool),
        }))
    }

    fn children(&self) -> Vec<Function> {
        self.children.clone()
    }

    fn with_children(&self, children: Vec<Function>) -> Result<Function> {
        if children.len() != self.op.arity() {
            return Err(PlanError::WrongNumberOfChildren {
                kind: self.op.name(),
                expected: self.op.arity(),
                actual: children.len(),
            });
        }
        Ok(Function::new(Self {
            op: self.op,
            children,
            stamp: self.stamp,
        }))
    }

    fn function_type(&self) -> &'static str {
        self.op.name()
    }

    fn serialize(&self) -> PbFunction {
        pb_node(self.function_type(), self.stamp, &self.children)
    }

    impl_equals_and_any!(LogicalFunction);
}

/// The uninhabited default. Holding one is legal; invoking it is not. Used
/// only as a placeholder slot, never as a real expression.
#[derive(Clone, Debug, PartialEq)]
pub struct NullFunction;

impl FunctionConcept for NullFunction {
    fn explain(&self) -> String {
        "NULL".to_owned()
    }

    fn stamp(&self) -> Option<DataType> {
        None
    }

    fn with_inferred_stamp(&self, _schema: &Schema) -> Result<Function> {
        Err(PlanError::NullFunctionInvoked)
    }

    fn children(&self) -> Vec<Function> {
        vec![]
    }

    fn with_children(&self, _children: Vec<Function>) -> Result<Function> {
        Err(PlanError::NullFunctionInvoked)
    }

    fn function_type(&self) -> &'static str {
        "Null"
    }

    fn serialize(&self) -> PbFunction {
        pb_node(self.function_type(), None, &[])
    }

    impl_equals_and_any!(NullFunction);
}
