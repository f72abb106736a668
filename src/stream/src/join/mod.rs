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

//! Windowed stream joins: per-worker partitioned build state per slice,
//! watermark-gated probes and serializable operator state.

mod build;
mod chained_hash_map;
mod handler;
mod paged_vector;
mod probe;
mod serialize;

use rill_common::catalog::Schema;
use rill_common::record::Record;
use rill_common::types::{DataType, VarVal};

pub use build::{JoinBuildOperator, JoinSide};
pub use chained_hash_map::ChainedHashMap;
pub(crate) use handler::JoinKey;
pub use handler::{JoinHandler, JoinSlice, JoinTrigger, SideState};
pub use paged_vector::PagedVector;
pub use probe::JoinProbeScan;
pub use serialize::{capture_state, restore_state};

use crate::error::{Result, StreamError};

/// Fixed-width row encoding for join build state. Rows are the concatenated
/// little-endian fields of one side's schema; variable-sized fields are
/// rejected at lowering.
#[derive(Clone, Debug)]
pub struct RowCodec {
    types: Vec<DataType>,
    row_size: usize,
}

impl RowCodec {
    pub fn build(schema: &Schema) -> Result<RowCodec> {
        if let Some(varsized) = schema
            .fields()
            .iter()
            .find(|f| f.data_type == DataType::VarSized)
        {
            return Err(StreamError::UnsupportedQuery(format!(
                "variable-sized field {} cannot enter join state",
                varsized.name
            )));
        }
        Ok(RowCodec {
            types: schema.fields().iter().map(|f| f.data_type).collect(),
            row_size: schema.size_of_schema_in_bytes(),
        })
    }

    pub fn row_size(&self) -> usize {
        self.row_size
    }

    pub fn encode(&self, record: &Record) -> Result<Vec<u8>> {
        let mut row = Vec::with_capacity(self.row_size);
        for (index, data_type) in self.types.iter().enumerate() {
            let value = record.get(index)?.cast_to(*data_type)?;
            let width = data_type.size_in_bytes();
            let mut scratch = [0u8; 8];
            value.write_le_bytes(&mut scratch[..width]);
            row.extend_from_slice(&scratch[..width]);
        }
        Ok(row)
    }

    pub fn decode(&self, row: &[u8]) -> Record {
        let mut values = Vec::with_capacity(self.types.len());
        let mut offset = 0;
        for data_type in &self.types {
            let width = data_type.size_in_bytes();
            values.push(VarVal::read_le_bytes(*data_type, &row[offset..offset + width]));
            offset += width;
        }
        Record::new(values)
    }
}

/// Encodes the equi-join key fields of one record.
pub(crate) fn encode_join_key(record: &Record, indices: &[usize]) -> Result<Vec<u8>> {
    let mut key = Vec::with_capacity(indices.len() * 8);
    for &index in indices {
        let value = record.get(index)?;
        let width = value.data_type().size_in_bytes();
        let mut scratch = [0u8; 8];
        value.write_le_bytes(&mut scratch[..width]);
        key.extend_from_slice(&scratch[..width]);
    }
    Ok(key)
}

pub(crate) fn hash_join_key(key: &[u8]) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use rill_common::catalog::Field;

    use super::*;

    #[test]
    fn row_codec_round_trips_fixed_width_rows() {
        let schema = Schema::new(vec![
            Field::new("id", DataType::UInt32),
            Field::new("value", DataType::Int64),
        ])
        .unwrap();
        let codec = RowCodec::build(&schema).unwrap();
        let record = Record::new(vec![VarVal::UInt32(7), VarVal::Int64(-9)]);
        let row = codec.encode(&record).unwrap();
        assert_eq!(row.len(), 12);
        assert_eq!(codec.decode(&row), record);
    }

    #[test]
    fn varsized_rows_are_rejected() {
        let schema = Schema::new(vec![Field::new("blob", DataType::VarSized)]).unwrap();
        assert!(matches!(
            RowCodec::build(&schema),
            Err(StreamError::UnsupportedQuery(_))
        ));
    }
}
