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

use std::collections::HashMap;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use itertools::Itertools;
use rill_common::buffer::TupleBuffer;
use rill_common::record::Record;
use rill_common::types::VarVal;

use super::handler::TRIGGER_RECORD_SIZE;
use super::{AggregateState, WindowAggregationHandler};
use crate::error::{Result, StreamError};
use crate::executor::{BufferScan, ExecutableOperator, ExecutionContext};

/// The head of a window emission pipeline: consumes a trigger record,
/// combines the window's slice state across partitions and pushes one result
/// record per key into the chain.
pub struct WindowEmitScan {
    handler: Arc<WindowAggregationHandler>,
    child: Arc<dyn ExecutableOperator>,
}

impl WindowEmitScan {
    pub fn new(
        handler: Arc<WindowAggregationHandler>,
        child: Arc<dyn ExecutableOperator>,
    ) -> Self {
        Self { handler, child }
    }
}

impl std::fmt::Debug for WindowEmitScan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowEmitScan").finish_non_exhaustive()
    }
}

impl BufferScan for WindowEmitScan {
    fn process(&self, ctx: &mut ExecutionContext<'_>, buffer: &TupleBuffer) -> Result<()> {
        let payload = buffer.read_bytes(0, TRIGGER_RECORD_SIZE)?;
        let trigger_id = LittleEndian::read_u64(&payload[0..8]);
        let trigger = self.handler.take_trigger(trigger_id)?;
        debug_assert_eq!(trigger.window_start, LittleEndian::read_u64(&payload[8..16]));
        debug_assert_eq!(trigger.window_end, LittleEndian::read_u64(&payload[16..24]));

        // Combine partial states across all slices and worker partitions of
        // the window.
        let mut combined: HashMap<Vec<u8>, (Vec<VarVal>, Vec<AggregateState>)> = HashMap::new();
        for slice in &trigger.slices {
            for partition in slice.partitions() {
                for (key, keyed) in partition.lock().iter() {
                    match combined.get_mut(key) {
                        Some((_, states)) => {
                            for (state, partial) in states.iter_mut().zip(&keyed.states) {
                                state.merge(partial)?;
                            }
                        }
                        None => {
                            combined.insert(
                                key.clone(),
                                (keyed.key_values.clone(), keyed.states.clone()),
                            );
                        }
                    }
                }
            }
        }

        self.child.open(ctx)?;
        // Deterministic key order keeps emissions reproducible.
        for key in combined.keys().cloned().sorted() {
            let (key_values, states) = combined.get(&key).ok_or_else(|| {
                StreamError::CorruptOperatorState("combined window state vanished".to_owned())
            })?;
            let mut values = Vec::with_capacity(
                2 + key_values.len() + self.handler.aggregations.len(),
            );
            values.push(VarVal::UInt64(trigger.window_start));
            values.push(VarVal::UInt64(trigger.window_end));
            values.extend(key_values.iter().cloned());
            for (aggregation, state) in self.handler.aggregations.iter().zip(states) {
                values.push(state.finalize(aggregation.result_type)?);
            }
            let mut record = Record::new(values);
            self.child.execute(ctx, &mut record)?;
        }
        self.child.close(ctx)
    }

    fn terminate(&self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        self.child.terminate(ctx)
    }
}
