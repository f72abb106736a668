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
use crate::window::TimeFunction;

/// Raises the invocation's watermark to the highest record timestamp seen,
/// so the emit at the pipeline tail stamps it onto outgoing buffers.
#[derive(Debug)]
pub struct WatermarkAssignerExecutor {
    time: TimeFunction,
    child: Arc<dyn ExecutableOperator>,
}

impl WatermarkAssignerExecutor {
    pub fn new(time: TimeFunction, child: Arc<dyn ExecutableOperator>) -> Self {
        Self { time, child }
    }
}

impl ExecutableOperator for WatermarkAssignerExecutor {
    fn open(&self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        self.child.open(ctx)
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>, record: &mut Record) -> Result<()> {
        let ts = self.time.extract(ctx, record)?;
        if ts > ctx.metadata.watermark {
            ctx.metadata.watermark = ts;
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
