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

use std::sync::Arc;

use rill_common::record::Record;

use super::{ExecutableOperator, ExecutionContext};
use crate::error::Result;
use crate::expression::CompiledExpression;

/// Computes an expression into a field: replacing an existing slot or
/// appending a new one.
#[derive(Debug)]
pub struct MapExecutor {
    expression: CompiledExpression,
    /// `Some` replaces the field at that index; `None` appends.
    target_index: Option<usize>,
    child: Arc<dyn ExecutableOperator>,
}

impl MapExecutor {
    pub fn new(
        expression: CompiledExpression,
        target_index: Option<usize>,
        child: Arc<dyn ExecutableOperator>,
    ) -> Self {
        Self {
            expression,
            target_index,
            child,
        }
    }
}

impl ExecutableOperator for MapExecutor {
    fn open(&self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        self.child.open(ctx)
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>, record: &mut Record) -> Result<()> {
        let value = self.expression.evaluate(record)?;
        match self.target_index {
            Some(index) => record.set(index, value)?,
            None => record.push(value),
        }
        self.child.execute(ctx, record)
    }

    fn close(&self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        self.child.close(ctx)
    }

    fn terminate(&self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        self.child.terminate(ctx)
    }
}
