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

//! Capture and rehydration of join operator state.
//!
//! The image is a sequence of tuple buffers: a metadata header (operator
//! type, version, entry geometry, bucket count, page size, last watermark,
//! processed records) followed by window descriptors `(start, end,
//! state_index, state_count)`, then one buffer of raw map/page bytes per
//! partition per window. Rehydration is symmetric; each state buffer's
//! tuple counter records its byte length, like any child buffer.

use std::sync::atomic::Ordering;

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::Mutex;
use rill_common::buffer::{BufferProvider, TupleBuffer};
use rill_plan::operator::JoinStrategy;

use super::{ChainedHashMap, JoinHandler, JoinSlice, PagedVector, SideState};
use crate::error::{Result, StreamError};
use crate::window::WindowSlice;

const STATE_VERSION: u32 = 1;

const OP_TYPE_HASH_JOIN: u8 = 1;
const OP_TYPE_NESTED_LOOP_JOIN: u8 = 2;

/// header: op_type(u8) version(u32) key_size(u64) value_size(u64)
/// bucket_count(u64) page_size(u64) last_watermark(u64)
/// processed_records(u64) right_value_size(u64) num_partitions(u64)
/// window_count(u64)
const HEADER_SIZE: usize = 1 + 4 + 9 * 8;
/// window descriptor: start, end, state_index, state_count
const WINDOW_DESCRIPTOR_SIZE: usize = 4 * 8;

/// Captures the handler's entire slice state to a sequence of buffers.
pub fn capture_state(
    handler: &JoinHandler,
    provider: &dyn BufferProvider,
) -> Result<Vec<TupleBuffer>> {
    let slices = handler.slice_store.get_by_range(0, u64::MAX);

    let mut state_buffers: Vec<TupleBuffer> = vec![];
    let mut descriptors: Vec<(u64, u64, u64, u64)> = vec![];
    for slice in &slices {
        let state_index = state_buffers.len() as u64;
        let mut state_count = 0u64;
        for partition in slice.left.iter().chain(slice.right.iter()) {
            let image = partition.lock().serialize();
            let buffer = provider.get_unpooled_buffer(image.len().max(1))?;
            buffer.write_bytes(0, &image)?;
            buffer.set_number_of_tuples(image.len() as u64);
            state_buffers.push(buffer);
            state_count += 1;
        }
        descriptors.push((slice.start(), slice.end(), state_index, state_count));
    }

    let header_len = HEADER_SIZE + descriptors.len() * WINDOW_DESCRIPTOR_SIZE;
    let mut header = vec![0u8; header_len];
    header[0] = match handler.strategy() {
        JoinStrategy::Hash => OP_TYPE_HASH_JOIN,
        JoinStrategy::NestedLoop => OP_TYPE_NESTED_LOOP_JOIN,
    };
    LittleEndian::write_u32(&mut header[1..5], STATE_VERSION);
    let key_size = handler.key.as_ref().map(|key| key.key_size).unwrap_or(0);
    let fields = [
        key_size as u64,
        handler.left_codec.row_size() as u64,
        handler.bucket_count as u64,
        handler.page_size as u64,
        handler.last_watermark.load(Ordering::Relaxed),
        handler.processed_records.load(Ordering::Relaxed),
        handler.right_codec.row_size() as u64,
        handler.num_partitions() as u64,
        descriptors.len() as u64,
    ];
    for (slot, value) in fields.iter().enumerate() {
        LittleEndian::write_u64(&mut header[5 + slot * 8..5 + (slot + 1) * 8], *value);
    }
    for (index, (start, end, state_index, state_count)) in descriptors.iter().enumerate() {
        let offset = HEADER_SIZE + index * WINDOW_DESCRIPTOR_SIZE;
        LittleEndian::write_u64(&mut header[offset..offset + 8], *start);
        LittleEndian::write_u64(&mut header[offset + 8..offset + 16], *end);
        LittleEndian::write_u64(&mut header[offset + 16..offset + 24], *state_index);
        LittleEndian::write_u64(&mut header[offset + 24..offset + 32], *state_count);
    }

    let header_buffer = provider.get_unpooled_buffer(header_len)?;
    header_buffer.write_bytes(0, &header)?;
    header_buffer.set_number_of_tuples(header_len as u64);

    let mut buffers = vec![header_buffer];
    buffers.extend(state_buffers);
    Ok(buffers)
}

/// Rehydrates a captured image into `handler`, which must be configured
/// with the same strategy and schemas.
pub fn restore_state(handler: &JoinHandler, buffers: &[TupleBuffer]) -> Result<()> {
    let header_buffer = buffers.first().ok_or_else(|| {
        StreamError::CorruptOperatorState("empty join state image".to_owned())
    })?;
    let header_len = header_buffer.number_of_tuples() as usize;
    let header = header_buffer.read_bytes(0, header_len)?;
    if header.len() < HEADER_SIZE {
        return Err(StreamError::CorruptOperatorState(
            "join state header truncated".to_owned(),
        ));
    }

    let op_type = header[0];
    let expected = match handler.strategy() {
        JoinStrategy::Hash => OP_TYPE_HASH_JOIN,
        JoinStrategy::NestedLoop => OP_TYPE_NESTED_LOOP_JOIN,
    };
    if op_type != expected {
        return Err(StreamError::CorruptOperatorState(format!(
            "state image of operator type {op_type}, expected {expected}"
        )));
    }
    let version = LittleEndian::read_u32(&header[1..5]);
    if version != STATE_VERSION {
        return Err(StreamError::CorruptOperatorState(format!(
            "unsupported join state version {version}"
        )));
    }

    let read_field = |slot: usize| LittleEndian::read_u64(&header[5 + slot * 8..5 + (slot + 1) * 8]);
    let key_size = read_field(0) as usize;
    let left_value_size = read_field(1) as usize;
    let bucket_count = read_field(2) as usize;
    let page_size = read_field(3) as usize;
    let last_watermark = read_field(4);
    let processed_records = read_field(5);
    let right_value_size = read_field(6) as usize;
    let num_partitions = read_field(7) as usize;
    let window_count = read_field(8) as usize;

    if header.len() != HEADER_SIZE + window_count * WINDOW_DESCRIPTOR_SIZE {
        return Err(StreamError::CorruptOperatorState(
            "join state descriptor table truncated".to_owned(),
        ));
    }

    for index in 0..window_count {
        let offset = HEADER_SIZE + index * WINDOW_DESCRIPTOR_SIZE;
        let start = LittleEndian::read_u64(&header[offset..offset + 8]);
        let end = LittleEndian::read_u64(&header[offset + 8..offset + 16]);
        let state_index = LittleEndian::read_u64(&header[offset + 16..offset + 24]) as usize;
        let state_count = LittleEndian::read_u64(&header[offset + 24..offset + 32]) as usize;
        if state_count != 2 * num_partitions {
            return Err(StreamError::CorruptOperatorState(format!(
                "window [{start}, {end}) carries {state_count} states for {num_partitions} partitions"
            )));
        }

        let mut sides = Vec::with_capacity(state_count);
        for slot in 0..state_count {
            let buffer = buffers.get(1 + state_index + slot).ok_or_else(|| {
                StreamError::CorruptOperatorState("join state buffer missing".to_owned())
            })?;
            let image = buffer.read_bytes(0, buffer.number_of_tuples() as usize)?;
            let value_size = if slot < num_partitions {
                left_value_size
            } else {
                right_value_size
            };
            let state = match handler.strategy() {
                JoinStrategy::Hash => SideState::Hash(ChainedHashMap::deserialize(
                    image,
                    key_size,
                    value_size,
                    bucket_count,
                )?),
                JoinStrategy::NestedLoop => {
                    SideState::Paged(PagedVector::deserialize(image, value_size, page_size)?)
                }
            };
            sides.push(Mutex::new(state));
        }
        let right = sides.split_off(num_partitions);
        let slice = JoinSlice::from_parts(start, end, sides, right);
        let restored = handler
            .slice_store
            .get_slice_or_create(start, move |_, _| slice);
        debug_assert_eq!(restored.end(), end);
    }

    handler.last_watermark.store(last_watermark, Ordering::Relaxed);
    handler
        .processed_records
        .store(processed_records, Ordering::Relaxed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use rill_common::buffer::BufferManager;
    use rill_common::catalog::{Field, Schema};
    use rill_common::ids::OriginId;
    use rill_common::record::Record;
    use rill_common::types::{DataType, VarVal};
    use rill_plan::window::WindowType;

    use super::super::{encode_join_key, hash_join_key, JoinKey, RowCodec};
    use super::*;
    use crate::expression::CompiledExpression;

    fn side_schema() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Int64),
            Field::new("value", DataType::Int64),
        ])
        .unwrap()
    }

    fn make_handler(strategy: JoinStrategy) -> JoinHandler {
        let left = side_schema();
        let right = side_schema().with_fields_renamed_by_prefix("right");
        let combined =
            rill_plan::operator::JoinOperator::combined_schema(&left, &right).unwrap();
        let condition = CompiledExpression::build(
            &rill_plan::function::equals(
                rill_plan::function::field("id"),
                rill_plan::function::field("right.id"),
            ),
            &combined,
        )
        .unwrap();
        JoinHandler::new(
            strategy,
            WindowType::Tumbling { size_ms: 1000 },
            RowCodec::build(&left).unwrap(),
            RowCodec::build(&right).unwrap(),
            Some(JoinKey {
                left_indices: vec![0],
                right_indices: vec![0],
                key_size: 8,
            }),
            condition,
            vec![OriginId::new(1), OriginId::new(2)],
            2,
            OriginId::new(99),
        )
        .unwrap()
    }

    fn populate(handler: &JoinHandler) {
        let codec = RowCodec::build(&side_schema()).unwrap();
        for i in 0..20i64 {
            let record = Record::new(vec![VarVal::Int64(i % 4), VarVal::Int64(i * 10)]);
            let row = codec.encode(&record).unwrap();
            let slice = handler.slice_for(500);
            let key = encode_join_key(&record, &[0]).unwrap();
            let partitions = if i % 2 == 0 { &slice.left } else { &slice.right };
            let mut partition = partitions[(i % 2) as usize].lock();
            match &mut *partition {
                SideState::Hash(map) => {
                    map.insert(hash_join_key(&key), &key, &row).unwrap()
                }
                SideState::Paged(vector) => vector.append(&row).unwrap(),
            }
        }
    }

    fn images(buffers: &[TupleBuffer]) -> Vec<Vec<u8>> {
        buffers
            .iter()
            .map(|b| {
                b.read_bytes(0, b.number_of_tuples() as usize)
                    .unwrap()
                    .to_vec()
            })
            .collect()
    }

    #[test]
    fn hash_join_state_round_trips() {
        let pool = BufferManager::new(256, 4).unwrap();
        let original = make_handler(JoinStrategy::Hash);
        populate(&original);

        let captured = capture_state(&original, &pool).unwrap();
        assert!(captured.len() > 1);

        let restored = make_handler(JoinStrategy::Hash);
        restore_state(&restored, &captured).unwrap();

        let recaptured = capture_state(&restored, &pool).unwrap();
        assert_eq!(images(&captured), images(&recaptured));
        assert_eq!(
            restored.processed_records.load(Ordering::Relaxed),
            original.processed_records.load(Ordering::Relaxed)
        );
    }

    #[test]
    fn nested_loop_state_round_trips() {
        let pool = BufferManager::new(256, 4).unwrap();
        let original = make_handler(JoinStrategy::NestedLoop);
        populate(&original);

        let captured = capture_state(&original, &pool).unwrap();
        let restored = make_handler(JoinStrategy::NestedLoop);
        restore_state(&restored, &captured).unwrap();
        assert_eq!(
            images(&captured),
            images(&capture_state(&restored, &pool).unwrap())
        );
    }

    #[test]
    fn wrong_operator_type_is_rejected() {
        let pool = BufferManager::new(256, 4).unwrap();
        let hash = make_handler(JoinStrategy::Hash);
        populate(&hash);
        let captured = capture_state(&hash, &pool).unwrap();

        let nested = make_handler(JoinStrategy::NestedLoop);
        assert!(matches!(
            restore_state(&nested, &captured),
            Err(StreamError::CorruptOperatorState(_))
        ));
    }
}
