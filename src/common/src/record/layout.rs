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

use crate::catalog::{MemoryLayoutHint, Schema};
use crate::error::{CommonError, Result};

/// The physical arrangement of a schema's tuples inside one buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemoryLayout {
    Row(RowLayout),
    Columnar(ColumnarLayout),
}

impl MemoryLayout {
    /// Computes the layout selected by the schema's hint for buffers of
    /// `buffer_size` bytes.
    pub fn of(schema: &Schema, buffer_size: usize) -> Result<MemoryLayout> {
        match schema.layout_hint() {
            MemoryLayoutHint::RowLayout => Ok(MemoryLayout::Row(RowLayout::new(
                schema,
                buffer_size,
            )?)),
            MemoryLayoutHint::ColumnarLayout => Ok(MemoryLayout::Columnar(ColumnarLayout::new(
                schema,
                buffer_size,
            )?)),
        }
    }

    /// How many tuples of the schema fit into one buffer.
    pub fn capacity(&self) -> usize {
        match self {
            MemoryLayout::Row(l) => l.capacity,
            MemoryLayout::Columnar(l) => l.capacity,
        }
    }

    pub fn tuple_size(&self) -> usize {
        match self {
            MemoryLayout::Row(l) => l.tuple_size,
            MemoryLayout::Columnar(l) => l.tuple_size,
        }
    }

    /// The byte address of `(tuple_index, field_index)` within the buffer.
    pub fn field_address(&self, tuple_index: usize, field_index: usize) -> usize {
        match self {
            MemoryLayout::Row(l) => {
                tuple_index * l.tuple_size + l.field_offsets[field_index]
            }
            MemoryLayout::Columnar(l) => {
                l.column_offsets[field_index] + tuple_index * l.field_sizes[field_index]
            }
        }
    }

    pub fn field_size(&self, field_index: usize) -> usize {
        match self {
            MemoryLayout::Row(l) => l.field_sizes[field_index],
            MemoryLayout::Columnar(l) => l.field_sizes[field_index],
        }
    }
}

fn field_sizes_of(schema: &Schema) -> Vec<usize> {
    schema
        .fields()
        .iter()
        .map(|f| f.data_type.size_in_bytes())
        .collect()
}

fn capacity_of(schema: &Schema, buffer_size: usize) -> Result<usize> {
    let tuple_size = schema.size_of_schema_in_bytes();
    if tuple_size == 0 {
        return Ok(0);
    }
    if tuple_size > buffer_size {
        return Err(CommonError::TuplesTooLargeForBufferSize {
            tuple_size,
            buffer_size,
        });
    }
    Ok(buffer_size / tuple_size)
}

/// Tuples laid out contiguously: field f of tuple t lives at
/// `t * tuple_size + field_offset[f]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowLayout {
    field_sizes: Vec<usize>,
    field_offsets: Vec<usize>,
    tuple_size: usize,
    capacity: usize,
}

impl RowLayout {
    pub fn new(schema: &Schema, buffer_size: usize) -> Result<Self> {
        let field_sizes = field_sizes_of(schema);
        let field_offsets = field_sizes
            .iter()
            .scan(0usize, |acc, size| {
                let offset = *acc;
                *acc += size;
                Some(offset)
            })
            .collect();
        Ok(Self {
            field_sizes,
            field_offsets,
            tuple_size: schema.size_of_schema_in_bytes(),
            capacity: capacity_of(schema, buffer_size)?,
        })
    }
}

/// One column block per field: field f of tuple t lives at
/// `column_offset[f] + t * field_size[f]`, with column blocks sized for the
/// buffer's tuple capacity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnarLayout {
    field_sizes: Vec<usize>,
    column_offsets: Vec<usize>,
    tuple_size: usize,
    capacity: usize,
}

impl ColumnarLayout {
    pub fn new(schema: &Schema, buffer_size: usize) -> Result<Self> {
        let field_sizes = field_sizes_of(schema);
        let capacity = capacity_of(schema, buffer_size)?;
        let column_offsets = field_sizes
            .iter()
            .scan(0usize, |acc, size| {
                let offset = *acc;
                *acc += size * capacity;
                Some(offset)
            })
            .collect();
        Ok(Self {
            field_sizes,
            column_offsets,
            tuple_size: schema.size_of_schema_in_bytes(),
            capacity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Field;
    use crate::types::DataType;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("a", DataType::UInt32),
            Field::new("b", DataType::UInt64),
            Field::new("c", DataType::Int8),
        ])
        .unwrap()
    }

    #[test]
    fn row_layout_addresses() {
        let layout = MemoryLayout::of(&schema(), 130).unwrap();
        // tuple size 13 -> 10 tuples fit
        assert_eq!(layout.capacity(), 10);
        assert_eq!(layout.field_address(0, 0), 0);
        assert_eq!(layout.field_address(0, 2), 12);
        assert_eq!(layout.field_address(3, 1), 3 * 13 + 4);
    }

    #[test]
    fn columnar_layout_addresses() {
        let columnar = schema().with_layout_hint(crate::catalog::MemoryLayoutHint::ColumnarLayout);
        let layout = MemoryLayout::of(&columnar, 130).unwrap();
        assert_eq!(layout.capacity(), 10);
        assert_eq!(layout.field_address(3, 0), 3 * 4);
        assert_eq!(layout.field_address(3, 1), 10 * 4 + 3 * 8);
        assert_eq!(layout.field_address(3, 2), 10 * 4 + 10 * 8 + 3);
    }

    #[test]
    fn oversized_tuple_is_rejected() {
        assert!(matches!(
            MemoryLayout::of(&schema(), 8),
            Err(CommonError::TuplesTooLargeForBufferSize { .. })
        ));
    }
}
