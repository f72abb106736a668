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
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::Mutex;
use rill_common::buffer::BufferProvider;
use rill_common::ids::{ChunkNumber, OriginId, SequenceNumber, WorkerThreadId};
use rill_common::types::VarVal;
use rill_common::util::current_time_millis;
use rill_plan::window::WindowType;

use super::{AggregateState, CompiledAggregation};
use crate::error::{Result, StreamError};
use crate::executor::{OperatorHandler, PipelineExecutionContext};
use crate::window::{SliceStore, WatermarkProcessor, WindowSlice};

/// Size of one serialized window-trigger record:
/// `[trigger_id][window_start][window_end]`.
pub(crate) const TRIGGER_RECORD_SIZE: usize = 3 * std::mem::size_of::<u64>();

/// The keyed state of one key within one slice partition.
#[derive(Clone, Debug)]
pub(crate) struct KeyedState {
    pub key_values: Vec<VarVal>,
    pub states: Vec<AggregateState>,
}

/// Pre-aggregated keyed state for one time slice, partitioned by worker
/// thread so builds stay contention-free.
pub struct AggSlice {
    start: u64,
    end: u64,
    partitions: Vec<Mutex<HashMap<Vec<u8>, KeyedState>>>,
}

impl AggSlice {
    pub fn new(start: u64, end: u64, num_partitions: usize) -> Self {
        Self {
            start,
            end,
            partitions: (0..num_partitions.max(1))
                .map(|_| Mutex::new(HashMap::new()))
                .collect(),
        }
    }

    pub(crate) fn partition(
        &self,
        index: usize,
    ) -> &Mutex<HashMap<Vec<u8>, KeyedState>> {
        &self.partitions[index % self.partitions.len()]
    }

    pub(crate) fn partitions(&self) -> &[Mutex<HashMap<Vec<u8>, KeyedState>>] {
        &self.partitions
    }
}

impl WindowSlice for AggSlice {
    fn start(&self) -> u64 {
        self.start
    }

    fn end(&self) -> u64 {
        self.end
    }
}

/// The state a trigger record refers to: the window bounds plus strong
/// references to every slice composing the window. The probe resolves the
/// payload through the handler, so collected slices can never be
/// resurrected.
pub struct WindowTrigger {
    pub window_start: u64,
    pub window_end: u64,
    pub slices: Vec<Arc<AggSlice>>,
}

/// The shared state of one windowed aggregation: slice store, watermark
/// tracking, window cursor and in-flight trigger payloads.
pub struct WindowAggregationHandler {
    window_type: WindowType,
    pub(crate) key_indices: Vec<usize>,
    pub(crate) aggregations: Vec<CompiledAggregation>,
    num_partitions: usize,
    slice_store: SliceStore<AggSlice>,
    watermarks: WatermarkProcessor,
    /// Start of the next window to consider for emission; windows are
    /// emitted in order because the global watermark is monotonic.
    window_cursor: Mutex<Option<u64>>,
    pending_triggers: Mutex<HashMap<u64, WindowTrigger>>,
    next_trigger_id: AtomicU64,
    output_origin: OriginId,
    next_output_sequence: AtomicU64,
}

impl WindowAggregationHandler {
    pub fn new(
        window_type: WindowType,
        key_indices: Vec<usize>,
        aggregations: Vec<CompiledAggregation>,
        origins: Vec<OriginId>,
        num_partitions: usize,
        output_origin: OriginId,
    ) -> Self {
        Self {
            window_type,
            key_indices,
            aggregations,
            num_partitions,
            slice_store: SliceStore::new(window_type.slice_width_ms()),
            watermarks: WatermarkProcessor::new(origins),
            window_cursor: Mutex::new(None),
            pending_triggers: Mutex::new(HashMap::new()),
            next_trigger_id: AtomicU64::new(1),
            output_origin,
            next_output_sequence: AtomicU64::new(0),
        }
    }

    pub fn slice_for(&self, ts: u64) -> Arc<AggSlice> {
        self.slice_store
            .get_slice_or_create(ts, |start, end| {
                AggSlice::new(start, end, self.num_partitions)
            })
    }

    /// Per-buffer close: records the watermark seen by `worker` for
    /// `origin`, recomputes the global watermark and emits every window it
    /// completes.
    pub fn update_watermark_and_trigger(
        &self,
        ctx: &PipelineExecutionContext,
        origin: OriginId,
        worker: WorkerThreadId,
        watermark: u64,
    ) -> Result<()> {
        self.watermarks
            .update_watermark_for_worker(origin, worker, watermark);
        let global = self.watermarks.global_watermark();
        self.emit_windows_up_to(ctx, global)
    }

    fn emit_windows_up_to(&self, ctx: &PipelineExecutionContext, watermark: u64) -> Result<()> {
        let size = self.window_type.size_ms();
        let slide = self.window_type.slide_ms();

        let mut cursor_slot = self.window_cursor.lock();
        let Some(first_start) = cursor_slot.or_else(|| {
            self.slice_store
                .min_start()
                .map(|start| start - start % slide)
        }) else {
            return Ok(()); // no state yet
        };

        let mut cursor = first_start;
        while cursor + size <= watermark {
            let slices = self.slice_store.get_by_range(cursor, cursor + size);
            if !slices.is_empty() {
                self.emit_trigger(ctx, cursor, cursor + size, slices)?;
            }
            cursor += slide;
        }
        *cursor_slot = Some(cursor);
        drop(cursor_slot);

        // Slices entirely before the cursor cannot contribute to any future
        // window; in-flight triggers keep their state alive.
        self.slice_store.erase_if(|slice| slice.end() <= cursor);
        Ok(())
    }

    fn emit_trigger(
        &self,
        ctx: &PipelineExecutionContext,
        window_start: u64,
        window_end: u64,
        slices: Vec<Arc<AggSlice>>,
    ) -> Result<()> {
        let trigger_id = self.next_trigger_id.fetch_add(1, Ordering::Relaxed);
        self.pending_triggers.lock().insert(
            trigger_id,
            WindowTrigger {
                window_start,
                window_end,
                slices,
            },
        );

        let buffer = ctx
            .buffer_manager()
            .get_unpooled_buffer(TRIGGER_RECORD_SIZE)?;
        let mut payload = [0u8; TRIGGER_RECORD_SIZE];
        LittleEndian::write_u64(&mut payload[0..8], trigger_id);
        LittleEndian::write_u64(&mut payload[8..16], window_start);
        LittleEndian::write_u64(&mut payload[16..24], window_end);
        buffer.write_bytes(0, &payload)?;

        buffer.set_origin_id(self.output_origin);
        buffer.set_sequence_number(SequenceNumber::new(
            self.next_output_sequence.fetch_add(1, Ordering::Relaxed) + 1,
        ));
        buffer.set_chunk_number(ChunkNumber::new(1));
        buffer.set_last_chunk(true);
        buffer.set_watermark(window_end);
        buffer.set_creation_timestamp_ms(current_time_millis());
        buffer.set_number_of_tuples(1);

        tracing::trace!(window_start, window_end, trigger_id, "triggering window");
        ctx.emit_buffer(buffer);
        Ok(())
    }

    /// Resolves a trigger record back to its state. Each trigger is
    /// consumable exactly once.
    pub fn take_trigger(&self, trigger_id: u64) -> Result<WindowTrigger> {
        self.pending_triggers
            .lock()
            .remove(&trigger_id)
            .ok_or_else(|| {
                StreamError::CorruptOperatorState(format!(
                    "window trigger {trigger_id} was already consumed or never emitted"
                ))
            })
    }

    pub fn output_origin(&self) -> OriginId {
        self.output_origin
    }
}

impl OperatorHandler for WindowAggregationHandler {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    /// Force-triggers every remaining window regardless of watermarks.
    fn terminate(&self, ctx: &PipelineExecutionContext) -> Result<()> {
        if let Some(max_end) = self.slice_store.max_end() {
            self.emit_windows_up_to(ctx, max_end.saturating_add(self.window_type.size_ms()))?;
        }
        Ok(())
    }
}
