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

use super::handler::KeyedState;
use super::{encode_group_key, WindowAggregationHandler};
use crate::error::Result;
use crate::executor::{ExecutableOperator, ExecutionContext};
use crate::window::TimeFunction;

/// The terminal operator of an aggregation build pipeline: folds each record
/// into its slice's per-worker keyed state and drives watermark-based window
/// triggering from buffer closes.
pub struct AggregationBuildOperator {
    operator_index: usize,
    time: TimeFunction,
    handler: Arc<WindowAggregationHandler>,
}

/// Per-buffer running maximum of extracted timestamps; becomes the buffer's
/// watermark contribution at close when no upstream assigner stamped one.
struct MaxTimestamp(u64);

impl AggregationBuildOperator {
    pub fn new(
        operator_index: usize,
        time: TimeFunction,
        handler: Arc<WindowAggregationHandler>,
    ) -> Self {
        Self {
            operator_index,
            time,
            handler,
        }
    }
}

impl std::fmt::Debug for AggregationBuildOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregationBuildOperator")
            .field("time", &self.time)
            .finish_non_exhaustive()
    }
}

impl ExecutableOperator for AggregationBuildOperator {
    fn open(&self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        ctx.set_operator_state(self.operator_index, MaxTimestamp(0));
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>, record: &mut Record) -> Result<()> {
        let ts = self.time.extract(ctx, record)?;
        let max_ts = ctx.operator_state_mut::<MaxTimestamp>(self.operator_index)?;
        max_ts.0 = max_ts.0.max(ts);

        let slice = self.handler.slice_for(ts);
        let key = encode_group_key(record, &self.handler.key_indices)?;
        let mut partition = slice.partition(ctx.worker.partition_index()).lock();
        let entry = match partition.get_mut(&key) {
            Some(entry) => entry,
            None => {
                let states = self
                    .handler
                    .aggregations
                    .iter()
                    .map(|agg| agg.init_state())
                    .collect::<Result<Vec<_>>>()?;
                let key_values = self
                    .handler
                    .key_indices
                    .iter()
                    .map(|&index| record.get(index).cloned())
                    .collect::<rill_common::Result<Vec<_>>>()?;
                partition.entry(key).or_insert(KeyedState {
                    key_values,
                    states,
                })
            }
        };
        for (aggregation, state) in self.handler.aggregations.iter().zip(&mut entry.states) {
            state.update(record.get(aggregation.field_index)?)?;
        }
        Ok(())
    }

    fn close(&self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        let max_ts = ctx
            .operator_state_mut::<MaxTimestamp>(self.operator_index)?
            .0;
        let watermark = ctx.metadata.watermark.max(max_ts);
        self.handler.update_watermark_and_trigger(
            ctx.pipeline,
            ctx.metadata.origin_id,
            ctx.worker.worker_thread_id(),
            watermark,
        )
    }

    fn terminate(&self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        use crate::executor::OperatorHandler;
        self.handler.terminate(ctx.pipeline)
    }
}
