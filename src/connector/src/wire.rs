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

//! The on-the-wire layout written by sinks for external consumers.
//!
//! Fixed-width fields are little-endian, integers two's-complement, floats
//! IEEE-754. Variable-sized values travel inline with a `u32` length prefix.
//! The buffer header precedes the tuples, in this order: originId(u64),
//! sequenceNumber(u64), chunkNumber(u64), lastChunk(u8), watermark(u64),
//! numberOfTuples(u64), numberOfChildBuffers(u32).

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rill_common::buffer::TupleBuffer;
use rill_common::catalog::Schema;
use rill_common::record::{Record, RecordBufferView};
use rill_common::types::{DataType, VariableSizedData, VarVal};

use crate::error::{ConnectorError, Result};

/// Encodes `buffer` (header plus all tuples of `schema`) for an external
/// consumer.
pub fn encode_buffer(buffer: &TupleBuffer, schema: &Schema) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(64 + buffer.capacity());
    out.write_u64::<LittleEndian>(buffer.origin_id().raw())?;
    out.write_u64::<LittleEndian>(buffer.sequence_number().raw())?;
    out.write_u64::<LittleEndian>(buffer.chunk_number().raw())?;
    out.write_u8(buffer.is_last_chunk() as u8)?;
    out.write_u64::<LittleEndian>(buffer.watermark())?;
    out.write_u64::<LittleEndian>(buffer.number_of_tuples())?;
    out.write_u32::<LittleEndian>(buffer.number_of_child_buffers())?;

    let view = RecordBufferView::new(buffer.clone(), schema.clone())?;
    for tuple_index in 0..view.number_of_tuples() {
        for field_index in 0..schema.len() {
            let value = view.read_value(tuple_index, field_index)?;
            encode_value(&mut out, &value)?;
        }
    }
    Ok(out)
}

fn encode_value(out: &mut Vec<u8>, value: &VarVal) -> Result<()> {
    match value {
        VarVal::VarSized(data) => {
            out.write_u32::<LittleEndian>(data.len() as u32)?;
            out.extend_from_slice(&data.bytes);
        }
        fixed => {
            let width = fixed.data_type().size_in_bytes();
            let mut scratch = [0u8; 8];
            fixed.write_le_bytes(&mut scratch[..width]);
            out.extend_from_slice(&scratch[..width]);
        }
    }
    Ok(())
}

/// The decoded header of one encoded buffer.
#[derive(Debug, PartialEq, Eq)]
pub struct WireHeader {
    pub origin_id: u64,
    pub sequence_number: u64,
    pub chunk_number: u64,
    pub last_chunk: bool,
    pub watermark: u64,
    pub number_of_tuples: u64,
    pub number_of_child_buffers: u32,
}

/// Decodes an encoded buffer back into its header and records. The inverse
/// of [`encode_buffer`]; used by tests and by file-sink readers.
pub fn decode_buffer(bytes: &[u8], schema: &Schema) -> Result<(WireHeader, Vec<Record>)> {
    let mut cursor = std::io::Cursor::new(bytes);
    let header = WireHeader {
        origin_id: cursor.read_u64::<LittleEndian>()?,
        sequence_number: cursor.read_u64::<LittleEndian>()?,
        chunk_number: cursor.read_u64::<LittleEndian>()?,
        last_chunk: cursor.read_u8()? != 0,
        watermark: cursor.read_u64::<LittleEndian>()?,
        number_of_tuples: cursor.read_u64::<LittleEndian>()?,
        number_of_child_buffers: cursor.read_u32::<LittleEndian>()?,
    };

    let mut records = Vec::with_capacity(header.number_of_tuples as usize);
    for _ in 0..header.number_of_tuples {
        let mut values = Vec::with_capacity(schema.len());
        for field in schema.fields() {
            values.push(decode_value(&mut cursor, field.data_type)?);
        }
        records.push(Record::new(values));
    }
    Ok((header, records))
}

fn decode_value(
    cursor: &mut std::io::Cursor<&[u8]>,
    data_type: DataType,
) -> Result<VarVal> {
    if data_type == DataType::VarSized {
        let len = cursor.read_u32::<LittleEndian>()? as usize;
        let start = cursor.position() as usize;
        let bytes = cursor
            .get_ref()
            .get(start..start + len)
            .ok_or_else(|| ConnectorError::Parse("varsized value truncated".to_owned()))?
            .to_vec();
        cursor.set_position((start + len) as u64);
        return Ok(VarVal::VarSized(VariableSizedData::new(bytes)));
    }
    let width = data_type.size_in_bytes();
    let mut scratch = [0u8; 8];
    cursor
        .get_ref()
        .get(cursor.position() as usize..cursor.position() as usize + width)
        .ok_or_else(|| ConnectorError::Parse("fixed value truncated".to_owned()))?
        .iter()
        .enumerate()
        .for_each(|(i, b)| scratch[i] = *b);
    cursor.set_position(cursor.position() + width as u64);
    Ok(VarVal::read_le_bytes(data_type, &scratch[..width]))
}

#[cfg(test)]
mod tests {
    use rill_common::buffer::{BufferManager, BufferProvider};
    use rill_common::catalog::Field;
    use rill_common::ids::{ChunkNumber, OriginId, SequenceNumber};

    use super::*;

    #[test]
    fn encode_decode_round_trip_with_varsized() {
        let schema = Schema::new(vec![
            Field::new("id", DataType::UInt32),
            Field::new("name", DataType::VarSized),
        ])
        .unwrap();
        let pool = BufferManager::new(256, 4).unwrap();
        let buffer = pool.get_buffer_no_blocking().unwrap();
        buffer.set_origin_id(OriginId::new(7));
        buffer.set_sequence_number(SequenceNumber::new(3));
        buffer.set_chunk_number(ChunkNumber::new(1));
        buffer.set_last_chunk(true);
        buffer.set_watermark(999);

        let view = RecordBufferView::new(buffer.clone(), schema.clone()).unwrap();
        view.append_record(
            &Record::new(vec![
                VarVal::UInt32(1),
                VarVal::VarSized(VariableSizedData::new(b"ada".to_vec())),
            ]),
            &pool,
        )
        .unwrap();
        view.append_record(
            &Record::new(vec![
                VarVal::UInt32(2),
                VarVal::VarSized(VariableSizedData::new(b"grace".to_vec())),
            ]),
            &pool,
        )
        .unwrap();

        let encoded = encode_buffer(&buffer, &schema).unwrap();
        let (header, records) = decode_buffer(&encoded, &schema).unwrap();

        assert_eq!(header.origin_id, 7);
        assert_eq!(header.sequence_number, 3);
        assert!(header.last_chunk);
        assert_eq!(header.watermark, 999);
        assert_eq!(header.number_of_tuples, 2);
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[1],
            Record::new(vec![
                VarVal::UInt32(2),
                VarVal::VarSized(VariableSizedData::new(b"grace".to_vec())),
            ])
        );
    }

    #[test]
    fn header_field_order_is_stable() {
        let schema = Schema::new(vec![Field::new("id", DataType::UInt32)]).unwrap();
        let pool = BufferManager::new(64, 1).unwrap();
        let buffer = pool.get_buffer_no_blocking().unwrap();
        buffer.set_origin_id(OriginId::new(0x0102030405060708));

        let encoded = encode_buffer(&buffer, &schema).unwrap();
        // originId is the first header field, little-endian.
        assert_eq!(&encoded[..8], &[8, 7, 6, 5, 4, 3, 2, 1]);
        // lastChunk sits directly behind the three u64s.
        assert_eq!(encoded[24], 0);
    }
}
