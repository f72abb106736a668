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

//! Executable expressions, lowered from logical function trees.
//!
//! Field accesses are resolved to positional indices against the operator's
//! input schema at build time, so record evaluation never touches field
//! names.

use std::cmp::Ordering;

use rill_common::catalog::Schema;
use rill_common::record::Record;
use rill_common::types::VarVal;
use rill_plan::function::{
    ArithmeticFunction, ArithmeticOp, ComparisonFunction, ComparisonOp, ConstantFunction,
    FieldAccessFunction, LogicalFunction, LogicalOp,
};
use rill_plan::Function;

use crate::error::{Result, StreamError};

/// A compiled expression over [`Record`]s.
#[derive(Debug)]
pub enum CompiledExpression {
    ReadField(usize),
    Constant(VarVal),
    Arithmetic {
        op: ArithmeticOp,
        lhs: Box<CompiledExpression>,
        rhs: Box<CompiledExpression>,
    },
    Comparison {
        op: ComparisonOp,
        lhs: Box<CompiledExpression>,
        rhs: Box<CompiledExpression>,
    },
    Logical {
        op: LogicalOp,
        inputs: Vec<CompiledExpression>,
    },
}

impl CompiledExpression {
    /// Lowers `function` against `input_schema`.
    pub fn build(function: &Function, input_schema: &Schema) -> Result<CompiledExpression> {
        if let Some(read) = function.try_get::<FieldAccessFunction>() {
            let index = input_schema.field_index(read.field_name())?;
            return Ok(CompiledExpression::ReadField(index));
        }
        if let Some(constant) = function.try_get::<ConstantFunction>() {
            return Ok(CompiledExpression::Constant(constant.value().clone()));
        }
        if let Some(arithmetic) = function.try_get::<ArithmeticFunction>() {
            let children = function.children();
            return Ok(CompiledExpression::Arithmetic {
                op: arithmetic.op(),
                lhs: Box::new(Self::build(&children[0], input_schema)?),
                rhs: Box::new(Self::build(&children[1], input_schema)?),
            });
        }
        if let Some(comparison) = function.try_get::<ComparisonFunction>() {
            let children = function.children();
            return Ok(CompiledExpression::Comparison {
                op: comparison.op(),
                lhs: Box::new(Self::build(&children[0], input_schema)?),
                rhs: Box::new(Self::build(&children[1], input_schema)?),
            });
        }
        if let Some(logical) = function.try_get::<LogicalFunction>() {
            let inputs = function
                .children()
                .iter()
                .map(|child| Self::build(child, input_schema))
                .collect::<Result<Vec<_>>>()?;
            return Ok(CompiledExpression::Logical {
                op: logical.op(),
                inputs,
            });
        }
        Err(StreamError::UnsupportedQuery(format!(
            "cannot lower function kind {}",
            function.function_type()
        )))
    }

    pub fn evaluate(&self, record: &Record) -> Result<VarVal> {
        match self {
            CompiledExpression::ReadField(index) => Ok(record.get(*index)?.clone()),
            CompiledExpression::Constant(value) => Ok(value.clone()),
            CompiledExpression::Arithmetic { op, lhs, rhs } => {
                let l = lhs.evaluate(record)?;
                let r = rhs.evaluate(record)?;
                Ok(match op {
                    ArithmeticOp::Add => l.add(&r)?,
                    ArithmeticOp::Sub => l.sub(&r)?,
                    ArithmeticOp::Mul => l.mul(&r)?,
                    ArithmeticOp::Div => l.div(&r)?,
                })
            }
            CompiledExpression::Comparison { op, lhs, rhs } => {
                let ordering = lhs.evaluate(record)?.compare(&rhs.evaluate(record)?)?;
                let holds = match op {
                    ComparisonOp::Equals => ordering == Ordering::Equal,
                    ComparisonOp::NotEquals => ordering != Ordering::Equal,
                    ComparisonOp::LessThan => ordering == Ordering::Less,
                    ComparisonOp::LessEquals => ordering != Ordering::Greater,
                    ComparisonOp::GreaterThan => ordering == Ordering::Greater,
                    ComparisonOp::GreaterEquals => ordering != Ordering::Less,
                };
                Ok(VarVal::Bool(holds))
            }
            CompiledExpression::Logical { op, inputs } => {
                let truth = |value: VarVal| {
                    value.as_bool().copied().ok_or_else(|| {
                        StreamError::UnsupportedQuery(
                            "logical input did not evaluate to a boolean".to_owned(),
                        )
                    })
                };
                Ok(VarVal::Bool(match op {
                    LogicalOp::And => {
                        truth(inputs[0].evaluate(record)?)?
                            && truth(inputs[1].evaluate(record)?)?
                    }
                    LogicalOp::Or => {
                        truth(inputs[0].evaluate(record)?)?
                            || truth(inputs[1].evaluate(record)?)?
                    }
                    LogicalOp::Negate => !truth(inputs[0].evaluate(record)?)?,
                }))
            }
        }
    }

    /// Evaluates a predicate expression.
    pub fn evaluate_bool(&self, record: &Record) -> Result<bool> {
        self.evaluate(record)?.as_bool().copied().ok_or_else(|| {
            StreamError::UnsupportedQuery("predicate did not evaluate to a boolean".to_owned())
        })
    }
}

#[cfg(test)]
mod tests {
    use rill_common::catalog::Field;
    use rill_common::types::DataType;
    use rill_plan::function::{and, constant, field, greater_than, less_than, mul};

    use super::*;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::UInt32),
            Field::new("value", DataType::Int64),
        ])
        .unwrap()
    }

    fn record(id: u32, value: i64) -> Record {
        Record::new(vec![VarVal::UInt32(id), VarVal::Int64(value)])
    }

    #[test]
    fn predicates_evaluate_with_promotion() {
        let predicate = and(
            greater_than(field("value"), constant(VarVal::Int32(10))),
            less_than(field("id"), constant(VarVal::UInt32(5))),
        );
        let compiled = CompiledExpression::build(&predicate, &schema()).unwrap();

        assert!(compiled.evaluate_bool(&record(1, 11)).unwrap());
        assert!(!compiled.evaluate_bool(&record(1, 10)).unwrap());
        assert!(!compiled.evaluate_bool(&record(7, 11)).unwrap());
    }

    #[test]
    fn arithmetic_evaluates_by_index() {
        let expression = mul(field("value"), constant(VarVal::Int64(3)));
        let compiled = CompiledExpression::build(&expression, &schema()).unwrap();
        assert_eq!(
            compiled.evaluate(&record(1, 7)).unwrap(),
            VarVal::Int64(21)
        );
    }

    #[test]
    fn unknown_fields_fail_at_build_time() {
        let expression = field("missing");
        assert!(CompiledExpression::build(&expression, &schema()).is_err());
    }
}
