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

/// Narrows each record to the configured field indices, in order.
#[derive(Debug)]
pub struct ProjectionExecutor {
    indices: Vec<usize>,
    child: Arc<dyn ExecutableOperator>,
}

impl ProjectionExecutor {
    pub fn new(indices: Vec<usize>, child: Arc<dyn ExecutableOperator>) -> Self {
        Self { indices, child }
    }
}

impl ExecutableOperator for ProjectionExecutor {
    fn open(&self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        self.child.open(ctx)
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>, record: &mut Record) -> Result<()> {
        let mut projected = record.project(&self.indices)?;
        self.child.execute(ctx, &mut projected)
    }

    fn close(&self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        self.child.close(ctx)
    }

    fn terminate(&self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        self.child.terminate(ctx)
    }
}
