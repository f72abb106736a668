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

//! Typed views over raw tuple buffers.

mod layout;
mod view;

pub use layout::MemoryLayout;
pub use view::RecordBufferView;

use smallvec::SmallVec;

use crate::error::Result;
use crate::types::VarVal;

/// One materialized tuple flowing through a pipeline, with values aligned to
/// the operator's input schema. Map operators may extend it.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    values: SmallVec<[VarVal; 8]>,
}

impl Record {
    pub fn new(values: impl IntoIterator<Item = VarVal>) -> Self {
        Self {
            values: values.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&VarVal> {
        self.values
            .get(index)
            .ok_or_else(|| crate::error::CommonError::FieldNotFound(format!("index {index}")))
    }

    pub fn set(&mut self, index: usize, value: VarVal) -> Result<()> {
        match self.values.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(crate::error::CommonError::FieldNotFound(format!(
                "index {index}"
            ))),
        }
    }

    pub fn push(&mut self, value: VarVal) {
        self.values.push(value);
    }

    /// Keeps only the values at `indices`, in that order.
    pub fn project(&self, indices: &[usize]) -> Result<Record> {
        let mut values = SmallVec::with_capacity(indices.len());
        for &index in indices {
            values.push(self.get(index)?.clone());
        }
        Ok(Record { values })
    }

    pub fn values(&self) -> &[VarVal] {
        &self.values
    }

    /// Concatenates two records, left side first. Used by join probes.
    pub fn concat(&self, other: &Record) -> Record {
        Record {
            values: self
                .values
                .iter()
                .chain(other.values.iter())
                .cloned()
                .collect(),
        }
    }
}
