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

use std::sync::atomic::Ordering;
use std::sync::Arc;

use rill_common::record::Record;

use super::{encode_join_key, hash_join_key, JoinHandler, SideState};
use crate::error::Result;
use crate::executor::{ExecutableOperator, ExecutionContext, OperatorHandler};
use crate::window::TimeFunction;

/// Which build side of the join an operator feeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinSide {
    Left,
    Right,
}

/// The terminal operator of one join build pipeline: appends each record to
/// its slice's per-worker partition for this side and drives watermark-based
/// window triggering from buffer closes.
pub struct JoinBuildOperator {
    operator_index: usize,
    side: JoinSide,
    time: TimeFunction,
    handler: Arc<JoinHandler>,
}

struct MaxTimestamp(u64);

impl JoinBuildOperator {
    pub fn new(
        operator_index: usize,
        side: JoinSide,
        time: TimeFunction,
        handler: Arc<JoinHandler>,
    ) -> Self {
        Self {
            operator_index,
            side,
            time,
            handler,
        }
    }
}

impl std::fmt::Debug for JoinBuildOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinBuildOperator")
            .field("side", &self.side)
            .finish_non_exhaustive()
    }
}

impl ExecutableOperator for JoinBuildOperator {
    fn open(&self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        ctx.set_operator_state(self.operator_index, MaxTimestamp(0));
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>, record: &mut Record) -> Result<()> {
        let ts = self.time.extract(ctx, record)?;
        let max_ts = ctx.operator_state_mut::<MaxTimestamp>(self.operator_index)?;
        max_ts.0 = max_ts.0.max(ts);

        let slice = self.handler.slice_for(ts);
        let partitions = match self.side {
            JoinSide::Left => &slice.left,
            JoinSide::Right => &slice.right,
        };
        let row = match self.side {
            JoinSide::Left => self.handler.left_codec.encode(record)?,
            JoinSide::Right => self.handler.right_codec.encode(record)?,
        };
        let mut partition = partitions[ctx.worker.partition_index() % partitions.len()].lock();
        match &mut *partition {
            SideState::Hash(map) => {
                let key_indices = match self.side {
                    JoinSide::Left => &self.handler.key.as_ref().expect("hash join key").left_indices,
                    JoinSide::Right => {
                        &self.handler.key.as_ref().expect("hash join key").right_indices
                    }
                };
                let key = encode_join_key(record, key_indices)?;
                map.insert(hash_join_key(&key), &key, &row)?;
            }
            SideState::Paged(vector) => vector.append(&row)?,
        }
        self.handler.processed_records.fetch_add(1, Ordering::Relaxed);
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
        self.handler.terminate(ctx.pipeline)
    }
}
