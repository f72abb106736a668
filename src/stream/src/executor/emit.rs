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

use std::sync::atomic::{AtomicU64, Ordering};

use rill_common::buffer::BufferProvider;
use rill_common::catalog::Schema;
use rill_common::ids::{ChunkNumber, SequenceNumber};
use rill_common::record::{Record, RecordBufferView};
use rill_common::util::{current_time_millis, StopToken};

use super::{ExecutableOperator, ExecutionContext};
use crate::error::{Result, StreamError};

/// The tail of every pipeline: copies records into output buffers and
/// flushes them with propagated metadata and a fresh output sequence.
pub struct EmitOperator {
    operator_index: usize,
    output_schema: Schema,
    next_sequence: AtomicU64,
}

struct EmitState {
    view: RecordBufferView,
}

impl EmitOperator {
    pub fn new(operator_index: usize, output_schema: Schema) -> Self {
        Self {
            operator_index,
            output_schema,
            next_sequence: AtomicU64::new(0),
        }
    }

    fn acquire_view(&self, ctx: &ExecutionContext<'_>) -> Result<RecordBufferView> {
        let manager = ctx.pipeline.buffer_manager();
        let buffer = manager
            .get_buffer_blocking(&StopToken::never())
            .ok_or_else(|| {
                StreamError::CorruptOperatorState("buffer wait cancelled".to_owned())
            })?;
        Ok(RecordBufferView::new(buffer, self.output_schema.clone())?)
    }

    fn flush(&self, ctx: &mut ExecutionContext<'_>, replace: bool) -> Result<()> {
        let state: &mut EmitState = ctx.operator_state_mut(self.operator_index)?;
        let buffer = state.view.buffer().clone();
        if buffer.number_of_tuples() == 0 {
            return Ok(());
        }

        buffer.set_origin_id(ctx.metadata.origin_id);
        buffer.set_sequence_number(SequenceNumber::new(
            self.next_sequence.fetch_add(1, Ordering::Relaxed) + 1,
        ));
        buffer.set_chunk_number(ChunkNumber::new(1));
        buffer.set_last_chunk(true);
        buffer.set_watermark(ctx.metadata.watermark);
        buffer.set_creation_timestamp_ms(current_time_millis());

        ctx.pipeline.emit_buffer(buffer);
        if replace {
            let fresh = self.acquire_view(ctx)?;
            let state: &mut EmitState = ctx.operator_state_mut(self.operator_index)?;
            state.view = fresh;
        }
        Ok(())
    }
}

impl std::fmt::Debug for EmitOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmitOperator")
            .field("output_schema", &self.output_schema.to_string())
            .finish_non_exhaustive()
    }
}

impl ExecutableOperator for EmitOperator {
    fn open(&self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        let view = self.acquire_view(ctx)?;
        ctx.set_operator_state(self.operator_index, EmitState { view });
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>, record: &mut Record) -> Result<()> {
        let manager = ctx.pipeline.buffer_manager().clone();
        let state: &mut EmitState = ctx.operator_state_mut(self.operator_index)?;
        if state.view.append_record(record, &manager)? {
            return Ok(());
        }
        // Buffer full: flush and retry in the fresh one.
        self.flush(ctx, true)?;
        let state: &mut EmitState = ctx.operator_state_mut(self.operator_index)?;
        if !state.view.append_record(record, &manager)? {
            return Err(StreamError::Common(
                rill_common::CommonError::TuplesTooLargeForBufferSize {
                    tuple_size: self.output_schema.size_of_schema_in_bytes(),
                    buffer_size: manager.buffer_size(),
                },
            ));
        }
        Ok(())
    }

    fn close(&self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        self.flush(ctx, false)
    }

    fn terminate(&self, _ctx: &mut ExecutionContext<'_>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use rill_common::buffer::{BufferManager, TupleBuffer};
    use rill_common::catalog::Field;
    use rill_common::ids::{OriginId, PipelineId, WorkerThreadId};
    use rill_common::types::{DataType, VarVal};

    use super::*;
    use crate::executor::{
        BufferMetadata, PipelineExecutionContext, WorkerContext,
    };

    fn context(
        pool: &BufferManager,
        collected: Arc<Mutex<Vec<TupleBuffer>>>,
    ) -> PipelineExecutionContext {
        PipelineExecutionContext::new(
            PipelineId::new(1),
            pool.clone(),
            1,
            vec![],
            Arc::new(move |buffer| collected.lock().push(buffer)),
        )
    }

    #[test]
    fn emits_full_buffers_and_flushes_the_rest_on_close() {
        let schema = Schema::new(vec![Field::new("x", DataType::UInt64)]).unwrap();
        // 3 tuples per 24-byte buffer.
        let pool = BufferManager::new(24, 8).unwrap();
        let collected: Arc<Mutex<Vec<TupleBuffer>>> = Arc::new(Mutex::new(vec![]));
        let pipeline_ctx = context(&pool, Arc::clone(&collected));
        let worker = WorkerContext::new(WorkerThreadId::new(0), pool.clone());

        let emit = EmitOperator::new(0, schema);
        let mut ctx = ExecutionContext::new(
            &worker,
            &pipeline_ctx,
            BufferMetadata {
                origin_id: OriginId::new(7),
                watermark: 123,
                ..BufferMetadata::default()
            },
        );
        emit.open(&mut ctx).unwrap();
        for i in 0..5u64 {
            let mut record = Record::new(vec![VarVal::UInt64(i)]);
            emit.execute(&mut ctx, &mut record).unwrap();
        }
        emit.close(&mut ctx).unwrap();

        let buffers = collected.lock();
        assert_eq!(buffers.len(), 2);
        assert_eq!(buffers[0].number_of_tuples(), 3);
        assert_eq!(buffers[1].number_of_tuples(), 2);
        assert_eq!(buffers[0].sequence_number().raw(), 1);
        assert_eq!(buffers[1].sequence_number().raw(), 2);
        assert_eq!(buffers[0].origin_id(), OriginId::new(7));
        assert_eq!(buffers[0].watermark(), 123);
    }

    #[test]
    fn empty_invocation_emits_nothing() {
        let schema = Schema::new(vec![Field::new("x", DataType::UInt64)]).unwrap();
        let pool = BufferManager::new(64, 4).unwrap();
        let collected: Arc<Mutex<Vec<TupleBuffer>>> = Arc::new(Mutex::new(vec![]));
        let pipeline_ctx = context(&pool, Arc::clone(&collected));
        let worker = WorkerContext::new(WorkerThreadId::new(0), pool.clone());

        let emit = EmitOperator::new(0, schema);
        let mut ctx =
            ExecutionContext::new(&worker, &pipeline_ctx, BufferMetadata::default());
        emit.open(&mut ctx).unwrap();
        emit.close(&mut ctx).unwrap();
        assert!(collected.lock().is_empty());
    }
}
