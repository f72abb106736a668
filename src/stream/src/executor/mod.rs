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

//! The push-based pipeline runtime.
//!
//! A pipeline is a scan driving a chain of operators over the records of one
//! input buffer. Operators are stateless and shared across worker threads;
//! per-invocation state lives in the [`ExecutionContext`], long-lived state
//! behind shared [`OperatorHandler`]s partitioned by worker thread.

mod emit;
mod filter;
mod map;
mod projection;
mod scan;
mod watermark;

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use rill_common::buffer::{BufferManager, TupleBuffer};
use rill_common::ids::{ChunkNumber, OriginId, PipelineId, SequenceNumber, WorkerThreadId};
use rill_common::record::Record;

pub use emit::EmitOperator;
pub use filter::FilterExecutor;
pub use map::MapExecutor;
pub use projection::ProjectionExecutor;
pub use scan::ScanOperator;
pub use watermark::WatermarkAssignerExecutor;

use crate::error::{Result, StreamError};

/// Per worker-thread execution environment.
#[derive(Clone)]
pub struct WorkerContext {
    worker_thread_id: WorkerThreadId,
    buffer_manager: BufferManager,
}

impl WorkerContext {
    pub fn new(worker_thread_id: WorkerThreadId, buffer_manager: BufferManager) -> Self {
        Self {
            worker_thread_id,
            buffer_manager,
        }
    }

    pub fn worker_thread_id(&self) -> WorkerThreadId {
        self.worker_thread_id
    }

    /// The partition index of this thread in per-worker state containers.
    pub fn partition_index(&self) -> usize {
        self.worker_thread_id.raw() as usize
    }

    pub fn buffer_manager(&self) -> &BufferManager {
        &self.buffer_manager
    }
}

/// Receives the buffers a pipeline emits: a sink, or the task queue of the
/// next pipeline.
pub type EmitBufferFn = Arc<dyn Fn(TupleBuffer) + Send + Sync>;

/// Long-lived state shared by the operators of one stateful plan operator
/// (aggregation or join), across build and probe pipelines.
pub trait OperatorHandler: Send + Sync {
    fn as_any(&self) -> &dyn Any;

    /// Force-flushes remaining state at query shutdown, emitting through
    /// `ctx` regardless of watermarks.
    fn terminate(&self, ctx: &PipelineExecutionContext) -> Result<()>;
}

/// The per-pipeline environment shared by all its invocations.
pub struct PipelineExecutionContext {
    pipeline_id: PipelineId,
    buffer_manager: BufferManager,
    emit: EmitBufferFn,
    handlers: Vec<Arc<dyn OperatorHandler>>,
    num_worker_threads: usize,
}

impl PipelineExecutionContext {
    pub fn new(
        pipeline_id: PipelineId,
        buffer_manager: BufferManager,
        num_worker_threads: usize,
        handlers: Vec<Arc<dyn OperatorHandler>>,
        emit: EmitBufferFn,
    ) -> Self {
        Self {
            pipeline_id,
            buffer_manager,
            emit,
            handlers,
            num_worker_threads,
        }
    }

    pub fn pipeline_id(&self) -> PipelineId {
        self.pipeline_id
    }

    pub fn buffer_manager(&self) -> &BufferManager {
        &self.buffer_manager
    }

    pub fn num_worker_threads(&self) -> usize {
        self.num_worker_threads
    }

    pub fn emit_buffer(&self, buffer: TupleBuffer) {
        (self.emit)(buffer);
    }

    pub fn handler(&self, index: usize) -> Result<&Arc<dyn OperatorHandler>> {
        self.handlers.get(index).ok_or_else(|| {
            StreamError::CorruptOperatorState(format!("no operator handler at index {index}"))
        })
    }

    /// Downcasts the handler at `index`, failing with a typed error.
    pub fn typed_handler<T: OperatorHandler + 'static>(&self, index: usize) -> Result<&T> {
        self.handler(index)?
            .as_any()
            .downcast_ref::<T>()
            .ok_or_else(|| {
                StreamError::CorruptOperatorState(format!(
                    "operator handler at index {index} has an unexpected type"
                ))
            })
    }

    pub fn handlers(&self) -> &[Arc<dyn OperatorHandler>] {
        &self.handlers
    }
}

/// The header metadata of the buffer currently being processed.
#[derive(Clone, Copy, Debug)]
pub struct BufferMetadata {
    pub origin_id: OriginId,
    pub sequence_number: SequenceNumber,
    pub chunk_number: ChunkNumber,
    pub last_chunk: bool,
    pub watermark: u64,
    pub creation_timestamp_ms: u64,
}

impl Default for BufferMetadata {
    fn default() -> Self {
        Self {
            origin_id: OriginId::INVALID,
            sequence_number: SequenceNumber::INVALID,
            chunk_number: ChunkNumber::INVALID,
            last_chunk: false,
            watermark: 0,
            creation_timestamp_ms: 0,
        }
    }
}

impl BufferMetadata {
    pub fn of(buffer: &TupleBuffer) -> Self {
        Self {
            origin_id: buffer.origin_id(),
            sequence_number: buffer.sequence_number(),
            chunk_number: buffer.chunk_number(),
            last_chunk: buffer.is_last_chunk(),
            watermark: buffer.watermark(),
            creation_timestamp_ms: buffer.creation_timestamp_ms(),
        }
    }
}

/// Everything one pipeline invocation sees.
pub struct ExecutionContext<'a> {
    pub worker: &'a WorkerContext,
    pub pipeline: &'a PipelineExecutionContext,
    pub metadata: BufferMetadata,
    operator_state: HashMap<usize, Box<dyn Any + Send>>,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(
        worker: &'a WorkerContext,
        pipeline: &'a PipelineExecutionContext,
        metadata: BufferMetadata,
    ) -> Self {
        Self {
            worker,
            pipeline,
            metadata,
            operator_state: HashMap::new(),
        }
    }

    /// Stores per-invocation state for the operator at `operator_index`.
    pub fn set_operator_state<T: Any + Send>(&mut self, operator_index: usize, state: T) {
        self.operator_state.insert(operator_index, Box::new(state));
    }

    pub fn operator_state_mut<T: Any + Send>(
        &mut self,
        operator_index: usize,
    ) -> Result<&mut T> {
        self.operator_state
            .get_mut(&operator_index)
            .and_then(|state| state.downcast_mut::<T>())
            .ok_or_else(|| {
                StreamError::CorruptOperatorState(format!(
                    "operator {operator_index} has no local state of the requested type"
                ))
            })
    }

    /// The system time seen by ingestion-time windows.
    pub fn current_system_time_ms(&self) -> u64 {
        rill_common::util::current_time_millis()
    }
}

/// One operator of a pipeline chain. `execute` is called once per record,
/// `open`/`close` once per buffer, `terminate` once at query shutdown.
pub trait ExecutableOperator: Send + Sync + std::fmt::Debug {
    fn open(&self, ctx: &mut ExecutionContext<'_>) -> Result<()>;

    fn execute(&self, ctx: &mut ExecutionContext<'_>, record: &mut Record) -> Result<()>;

    fn close(&self, ctx: &mut ExecutionContext<'_>) -> Result<()>;

    fn terminate(&self, ctx: &mut ExecutionContext<'_>) -> Result<()>;
}

/// The record producer at the head of a pipeline.
pub trait BufferScan: Send + Sync + std::fmt::Debug {
    /// Processes one input buffer: opens the chain, pushes every record,
    /// closes the chain.
    fn process(&self, ctx: &mut ExecutionContext<'_>, buffer: &TupleBuffer) -> Result<()>;

    /// Propagates query shutdown through the chain.
    fn terminate(&self, ctx: &mut ExecutionContext<'_>) -> Result<()>;
}

/// A compiled pipeline: a scan head over an operator chain.
pub struct ExecutablePipeline {
    pipeline_id: PipelineId,
    scan: Box<dyn BufferScan>,
}

impl ExecutablePipeline {
    pub fn new(pipeline_id: PipelineId, scan: Box<dyn BufferScan>) -> Self {
        Self { pipeline_id, scan }
    }

    pub fn pipeline_id(&self) -> PipelineId {
        self.pipeline_id
    }

    pub fn execute_buffer(
        &self,
        worker: &WorkerContext,
        pipeline_ctx: &PipelineExecutionContext,
        buffer: &TupleBuffer,
    ) -> Result<()> {
        let mut ctx = ExecutionContext::new(worker, pipeline_ctx, BufferMetadata::of(buffer));
        self.scan.process(&mut ctx, buffer)
    }

    pub fn terminate(
        &self,
        worker: &WorkerContext,
        pipeline_ctx: &PipelineExecutionContext,
    ) -> Result<()> {
        let mut ctx =
            ExecutionContext::new(worker, pipeline_ctx, BufferMetadata::default());
        self.scan.terminate(&mut ctx)
    }
}

impl std::fmt::Debug for ExecutablePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutablePipeline")
            .field("pipeline_id", &self.pipeline_id)
            .finish_non_exhaustive()
    }
}
