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

use byteorder::{ByteOrder, LittleEndian};

use super::layout::MemoryLayout;
use super::Record;
use crate::buffer::{
    read_var_sized_with_length_prefix, write_var_sized_with_length_prefix, BufferProvider,
    TupleBuffer, VariableSizedAccess,
};
use crate::catalog::Schema;
use crate::error::{CommonError, Result};
use crate::types::{DataType, VariableSizedData, VarVal};

/// A typed view over one raw tuple buffer.
///
/// Reads and writes go through the physical layout computed from the schema;
/// variable-sized fields resolve through the buffer's child chain. Writing a
/// varsized field consults `provider` to allocate child buffers as needed.
pub struct RecordBufferView {
    buffer: TupleBuffer,
    schema: Schema,
    layout: MemoryLayout,
}

impl RecordBufferView {
    pub fn new(buffer: TupleBuffer, schema: Schema) -> Result<Self> {
        let layout = MemoryLayout::of(&schema, buffer.capacity())?;
        Ok(Self {
            buffer,
            schema,
            layout,
        })
    }

    pub fn buffer(&self) -> &TupleBuffer {
        &self.buffer
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// How many tuples fit into the underlying buffer.
    pub fn capacity(&self) -> usize {
        self.layout.capacity()
    }

    /// How many tuples the buffer currently holds.
    pub fn number_of_tuples(&self) -> usize {
        self.buffer.number_of_tuples() as usize
    }

    /// Reads field `field_index` of tuple `tuple_index`.
    pub fn read_value(&self, tuple_index: usize, field_index: usize) -> Result<VarVal> {
        let data_type = self.schema.fields()[field_index].data_type;
        let address = self.layout.field_address(tuple_index, field_index);
        let raw = self
            .buffer
            .read_bytes(address, self.layout.field_size(field_index))?;
        if data_type == DataType::VarSized {
            let access = VariableSizedAccess::unpack(LittleEndian::read_u64(raw));
            let bytes = read_var_sized_with_length_prefix(&self.buffer, access)?;
            return Ok(VarVal::VarSized(VariableSizedData::new(bytes)));
        }
        Ok(VarVal::read_le_bytes(data_type, raw))
    }

    /// Writes field `field_index` of tuple `tuple_index`.
    pub fn write_value(
        &self,
        tuple_index: usize,
        field_index: usize,
        value: &VarVal,
        provider: &dyn BufferProvider,
    ) -> Result<()> {
        let field = &self.schema.fields()[field_index];
        let address = self.layout.field_address(tuple_index, field_index);
        if field.data_type == DataType::VarSized {
            let var_sized = value
                .as_var_sized()
                .ok_or_else(|| CommonError::IncompatibleTypes {
                    op: "write",
                    lhs: value.data_type(),
                    rhs: DataType::VarSized,
                })?;
            let access =
                write_var_sized_with_length_prefix(&self.buffer, provider, &var_sized.bytes)?;
            let mut packed = [0u8; 8];
            LittleEndian::write_u64(&mut packed, access.pack());
            return self.buffer.write_bytes(address, &packed);
        }
        let value = if value.data_type() == field.data_type {
            value.clone()
        } else {
            value.cast_to(field.data_type)?
        };
        let mut scratch = [0u8; 8];
        let width = self.layout.field_size(field_index);
        value.write_le_bytes(&mut scratch[..width]);
        self.buffer.write_bytes(address, &scratch[..width])
    }

    /// Materializes tuple `tuple_index` into an owned [`Record`].
    pub fn read_record(&self, tuple_index: usize) -> Result<Record> {
        let mut values = Vec::with_capacity(self.schema.len());
        for field_index in 0..self.schema.len() {
            values.push(self.read_value(tuple_index, field_index)?);
        }
        Ok(Record::new(values))
    }

    /// Appends `record` behind the last tuple. Returns `false` without
    /// writing when the buffer is full.
    pub fn append_record(&self, record: &Record, provider: &dyn BufferProvider) -> Result<bool> {
        let index = self.number_of_tuples();
        if index >= self.capacity() {
            return Ok(false);
        }
        for (field_index, value) in record.values().iter().enumerate() {
            self.write_value(index, field_index, value, provider)?;
        }
        self.buffer.set_number_of_tuples(index as u64 + 1);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::buffer::BufferManager;
    use crate::catalog::{Field, MemoryLayoutHint};

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::UInt32),
            Field::new("value", DataType::Int64),
            Field::new("tag", DataType::VarSized),
        ])
        .unwrap()
    }

    #[test]
    fn append_and_read_back_row_layout() {
        let pool = BufferManager::new(256, 4).unwrap();
        let view =
            RecordBufferView::new(pool.get_buffer_no_blocking().unwrap(), schema()).unwrap();

        let record = Record::new(vec![
            VarVal::UInt32(7),
            VarVal::Int64(-3),
            VarVal::VarSized(VariableSizedData::new(b"streaming".to_vec())),
        ]);
        assert!(view.append_record(&record, &pool).unwrap());
        assert_eq!(view.number_of_tuples(), 1);
        assert_eq!(view.read_record(0).unwrap(), record);
    }

    #[test]
    fn append_and_read_back_columnar_layout() {
        let pool = BufferManager::new(256, 4).unwrap();
        let schema = schema().with_layout_hint(MemoryLayoutHint::ColumnarLayout);
        let view =
            RecordBufferView::new(pool.get_buffer_no_blocking().unwrap(), schema).unwrap();

        for i in 0..3u32 {
            let record = Record::new(vec![
                VarVal::UInt32(i),
                VarVal::Int64(i as i64 * 10),
                VarVal::VarSized(VariableSizedData::new(format!("tag-{i}").into_bytes())),
            ]);
            assert!(view.append_record(&record, &pool).unwrap());
        }
        for i in 0..3u32 {
            assert_eq!(
                view.read_value(i as usize, 1).unwrap(),
                VarVal::Int64(i as i64 * 10)
            );
            assert_eq!(
                view.read_value(i as usize, 2).unwrap(),
                VarVal::VarSized(VariableSizedData::new(format!("tag-{i}").into_bytes()))
            );
        }
    }

    #[test]
    fn append_to_full_buffer_is_refused() {
        // 20 bytes per tuple, 32-byte buffers: one tuple fits.
        let pool = BufferManager::new(32, 4).unwrap();
        let fixed = Schema::new(vec![
            Field::new("a", DataType::UInt64),
            Field::new("b", DataType::UInt64),
            Field::new("c", DataType::UInt32),
        ])
        .unwrap();
        let view = RecordBufferView::new(pool.get_buffer_no_blocking().unwrap(), fixed).unwrap();

        let record = Record::new(vec![
            VarVal::UInt64(1),
            VarVal::UInt64(2),
            VarVal::UInt32(3),
        ]);
        assert!(view.append_record(&record, &pool).unwrap());
        assert!(!view.append_record(&record, &pool).unwrap());
        assert_eq!(view.number_of_tuples(), 1);
    }
}
