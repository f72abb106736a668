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

use rill_common::buffer::TupleBuffer;
use rill_common::catalog::Schema;
use rill_common::record::RecordBufferView;

use super::{BufferScan, ExecutableOperator, ExecutionContext};
use crate::error::Result;

/// Iterates the records of the input buffer through the layout computed from
/// the input schema and pushes them into the chain.
pub struct ScanOperator {
    schema: Schema,
    child: Arc<dyn ExecutableOperator>,
}

impl ScanOperator {
    pub fn new(schema: Schema, child: Arc<dyn ExecutableOperator>) -> Self {
        Self { schema, child }
    }
}

impl std::fmt::Debug for ScanOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanOperator")
            .field("schema", &self.schema.to_string())
            .finish_non_exhaustive()
    }
}

impl BufferScan for ScanOperator {
    fn process(&self, ctx: &mut ExecutionContext<'_>, buffer: &TupleBuffer) -> Result<()> {
        self.child.open(ctx)?;
        let view = RecordBufferView::new(buffer.clone(), self.schema.clone())?;
        for tuple_index in 0..view.number_of_tuples() {
            let mut record = view.read_record(tuple_index)?;
            self.child.execute(ctx, &mut record)?;
        }
        self.child.close(ctx)
    }

    fn terminate(&self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        self.child.terminate(ctx)
    }
}
