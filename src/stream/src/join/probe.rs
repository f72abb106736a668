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

use byteorder::{ByteOrder, LittleEndian};
use rill_common::buffer::TupleBuffer;

use super::handler::TRIGGER_RECORD_SIZE;
use super::{JoinHandler, SideState};
use crate::error::{Result, StreamError};
use crate::executor::{BufferScan, ExecutableOperator, ExecutionContext};

/// The head of a join probe pipeline: consumes a trigger record and emits
/// every combined record of the window. One worker runs one trigger; the
/// build sides are quiescent for this window by watermark.
pub struct JoinProbeScan {
    handler: Arc<JoinHandler>,
    child: Arc<dyn ExecutableOperator>,
}

impl JoinProbeScan {
    pub fn new(handler: Arc<JoinHandler>, child: Arc<dyn ExecutableOperator>) -> Self {
        Self { handler, child }
    }

    fn probe_hash(
        &self,
        ctx: &mut ExecutionContext<'_>,
        trigger: &super::JoinTrigger,
    ) -> Result<()> {
        for slice in &trigger.slices {
            for left_partition in &slice.left {
                let left = left_partition.lock();
                let SideState::Hash(left_map) = &*left else {
                    return Err(StreamError::CorruptOperatorState(
                        "hash probe over non-hash build state".to_owned(),
                    ));
                };
                for (hash, key, left_row) in left_map.iter() {
                    let left_record = self.handler.left_codec.decode(left_row);
                    for right_partition in &slice.right {
                        let right = right_partition.lock();
                        let SideState::Hash(right_map) = &*right else {
                            return Err(StreamError::CorruptOperatorState(
                                "hash probe over non-hash build state".to_owned(),
                            ));
                        };
                        for right_row in right_map.lookup(hash, key) {
                            let right_record = self.handler.right_codec.decode(right_row);
                            let mut combined = left_record.concat(&right_record);
                            if self.handler.condition.evaluate_bool(&combined)? {
                                self.child.execute(ctx, &mut combined)?;
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn probe_nested_loop(
        &self,
        ctx: &mut ExecutionContext<'_>,
        trigger: &super::JoinTrigger,
    ) -> Result<()> {
        for slice in &trigger.slices {
            for left_partition in &slice.left {
                let left = left_partition.lock();
                let SideState::Paged(left_rows) = &*left else {
                    return Err(StreamError::CorruptOperatorState(
                        "nested-loop probe over non-paged build state".to_owned(),
                    ));
                };
                for left_row in left_rows.iter() {
                    let left_record = self.handler.left_codec.decode(left_row);
                    for right_partition in &slice.right {
                        let right = right_partition.lock();
                        let SideState::Paged(right_rows) = &*right else {
                            return Err(StreamError::CorruptOperatorState(
                                "nested-loop probe over non-paged build state".to_owned(),
                            ));
                        };
                        for right_row in right_rows.iter() {
                            let right_record = self.handler.right_codec.decode(right_row);
                            let mut combined = left_record.concat(&right_record);
                            if self.handler.condition.evaluate_bool(&combined)? {
                                self.child.execute(ctx, &mut combined)?;
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for JoinProbeScan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinProbeScan")
            .field("strategy", &self.handler.strategy())
            .finish_non_exhaustive()
    }
}

impl BufferScan for JoinProbeScan {
    fn process(&self, ctx: &mut ExecutionContext<'_>, buffer: &TupleBuffer) -> Result<()> {
        let payload = buffer.read_bytes(0, TRIGGER_RECORD_SIZE)?;
        let trigger_id = LittleEndian::read_u64(&payload[0..8]);
        let trigger = self.handler.take_trigger(trigger_id)?;

        self.child.open(ctx)?;
        match self.handler.strategy() {
            rill_plan::operator::JoinStrategy::Hash => self.probe_hash(ctx, &trigger)?,
            rill_plan::operator::JoinStrategy::NestedLoop => {
                self.probe_nested_loop(ctx, &trigger)?
            }
        }
        self.child.close(ctx)
    }

    fn terminate(&self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        self.child.terminate(ctx)
    }
}
