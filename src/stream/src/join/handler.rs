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
use rill_common::util::current_time_millis;
use rill_plan::operator::JoinStrategy;
use rill_plan::window::WindowType;

use super::{ChainedHashMap, PagedVector, RowCodec};
use crate::error::{Result, StreamError};
use crate::executor::{OperatorHandler, PipelineExecutionContext};
use crate::expression::CompiledExpression;
use crate::window::{SliceStore, WatermarkProcessor, WindowSlice};

/// Size of one serialized join-trigger record:
/// `[trigger_id][window_start][window_end]`.
pub(crate) const TRIGGER_RECORD_SIZE: usize = 3 * std::mem::size_of::<u64>();

/// Build-side state of one partition: hash-indexed or append-only,
/// depending on the join strategy.
pub enum SideState {
    Hash(ChainedHashMap),
    Paged(PagedVector),
}

impl SideState {
    pub fn len(&self) -> usize {
        match self {
            SideState::Hash(map) => map.len(),
            SideState::Paged(vector) => vector.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn serialize(&self) -> Vec<u8> {
        match self {
            SideState::Hash(map) => map.serialize(),
            SideState::Paged(vector) => vector.serialize(),
        }
    }
}

/// Join state for one time slice: per-worker partitions for both build
/// sides.
pub struct JoinSlice {
    start: u64,
    end: u64,
    pub(crate) left: Vec<Mutex<SideState>>,
    pub(crate) right: Vec<Mutex<SideState>>,
}

impl JoinSlice {
    pub(crate) fn from_parts(
        start: u64,
        end: u64,
        left: Vec<Mutex<SideState>>,
        right: Vec<Mutex<SideState>>,
    ) -> Self {
        Self {
            start,
            end,
            left,
            right,
        }
    }
}

impl WindowSlice for JoinSlice {
    fn start(&self) -> u64 {
        self.start
    }

    fn end(&self) -> u64 {
        self.end
    }
}

/// The state a join trigger record refers to.
pub struct JoinTrigger {
    pub window_start: u64,
    pub window_end: u64,
    pub slices: Vec<Arc<JoinSlice>>,
}

/// Equi-join key columns of both sides, for the hash strategy.
#[derive(Clone, Debug)]
pub(crate) struct JoinKey {
    pub left_indices: Vec<usize>,
    pub right_indices: Vec<usize>,
    pub key_size: usize,
}

/// The shared state of one windowed join across its build and probe
/// pipelines.
pub struct JoinHandler {
    strategy: JoinStrategy,
    window_type: WindowType,
    pub(crate) left_codec: RowCodec,
    pub(crate) right_codec: RowCodec,
    pub(crate) key: Option<JoinKey>,
    pub(crate) condition: CompiledExpression,
    num_partitions: usize,
    pub(crate) bucket_count: usize,
    pub(crate) page_size: usize,
    pub(crate) slice_store: SliceStore<JoinSlice>,
    watermarks: WatermarkProcessor,
    window_cursor: Mutex<Option<u64>>,
    pending_triggers: Mutex<HashMap<u64, JoinTrigger>>,
    next_trigger_id: AtomicU64,
    output_origin: OriginId,
    next_output_sequence: AtomicU64,
    pub(crate) processed_records: AtomicU64,
    pub(crate) last_watermark: AtomicU64,
}

impl JoinHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        strategy: JoinStrategy,
        window_type: WindowType,
        left_codec: RowCodec,
        right_codec: RowCodec,
        key: Option<JoinKey>,
        condition: CompiledExpression,
        origins: Vec<OriginId>,
        num_partitions: usize,
        output_origin: OriginId,
    ) -> Result<Self> {
        if strategy == JoinStrategy::Hash && key.is_none() {
            return Err(StreamError::UnsupportedQuery(
                "hash join requires an equi-join condition".to_owned(),
            ));
        }
        Ok(Self {
            strategy,
            window_type,
            left_codec,
            right_codec,
            key,
            condition,
            num_partitions: num_partitions.max(1),
            bucket_count: 1024,
            page_size: 4096,
            slice_store: SliceStore::new(window_type.slice_width_ms()),
            watermarks: WatermarkProcessor::new(origins),
            window_cursor: Mutex::new(None),
            pending_triggers: Mutex::new(HashMap::new()),
            next_trigger_id: AtomicU64::new(1),
            output_origin,
            next_output_sequence: AtomicU64::new(0),
            processed_records: AtomicU64::new(0),
            last_watermark: AtomicU64::new(0),
        })
    }

    pub fn strategy(&self) -> JoinStrategy {
        self.strategy
    }

    pub fn window_type(&self) -> WindowType {
        self.window_type
    }

    pub(crate) fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    pub(crate) fn new_side_state(&self, left: bool) -> SideState {
        let row_size = if left {
            self.left_codec.row_size()
        } else {
            self.right_codec.row_size()
        };
        match self.strategy {
            JoinStrategy::Hash => {
                let key_size = self
                    .key
                    .as_ref()
                    .map(|key| key.key_size)
                    .unwrap_or_default();
                SideState::Hash(ChainedHashMap::new(key_size, row_size, self.bucket_count))
            }
            JoinStrategy::NestedLoop => {
                SideState::Paged(PagedVector::new(row_size, self.page_size))
            }
        }
    }

    pub fn slice_for(&self, ts: u64) -> Arc<JoinSlice> {
        self.slice_store.get_slice_or_create(ts, |start, end| JoinSlice {
            start,
            end,
            left: (0..self.num_partitions)
                .map(|_| Mutex::new(self.new_side_state(true)))
                .collect(),
            right: (0..self.num_partitions)
                .map(|_| Mutex::new(self.new_side_state(false)))
                .collect(),
        })
    }

    /// Per-buffer close of either build side.
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
        self.last_watermark.fetch_max(global, Ordering::Relaxed);
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
            return Ok(());
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

        self.slice_store.erase_if(|slice| slice.end() <= cursor);
        Ok(())
    }

    fn emit_trigger(
        &self,
        ctx: &PipelineExecutionContext,
        window_start: u64,
        window_end: u64,
        slices: Vec<Arc<JoinSlice>>,
    ) -> Result<()> {
        let trigger_id = self.next_trigger_id.fetch_add(1, Ordering::Relaxed);
        self.pending_triggers.lock().insert(
            trigger_id,
            JoinTrigger {
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

        tracing::trace!(window_start, window_end, trigger_id, "triggering join window");
        ctx.emit_buffer(buffer);
        Ok(())
    }

    pub fn take_trigger(&self, trigger_id: u64) -> Result<JoinTrigger> {
        self.pending_triggers
            .lock()
            .remove(&trigger_id)
            .ok_or_else(|| {
                StreamError::CorruptOperatorState(format!(
                    "join trigger {trigger_id} was already consumed or never emitted"
                ))
            })
    }
}

impl OperatorHandler for JoinHandler {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn terminate(&self, ctx: &PipelineExecutionContext) -> Result<()> {
        if let Some(max_end) = self.slice_store.max_end() {
            self.emit_windows_up_to(ctx, max_end.saturating_add(self.window_type.size_ms()))?;
        }
        Ok(())
    }
}
