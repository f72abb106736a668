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

//! Keyed windowed aggregation: aggregate functions, per-slice state and the
//! build/probe operator pair.

mod build;
mod handler;
mod probe;

use rill_common::catalog::Schema;
use rill_common::record::Record;
use rill_common::types::{DataType, VarVal};
use rill_plan::operator::{AggregationDescriptor, AggregationKind};

pub use build::AggregationBuildOperator;
pub use handler::{AggSlice, WindowAggregationHandler, WindowTrigger};
pub use probe::WindowEmitScan;

use crate::error::{Result, StreamError};

/// One aggregation with its input resolved to a field index.
#[derive(Clone, Debug)]
pub struct CompiledAggregation {
    pub kind: AggregationKind,
    pub field_index: usize,
    pub result_type: DataType,
}

impl CompiledAggregation {
    pub fn build(
        descriptor: &AggregationDescriptor,
        input_schema: &Schema,
    ) -> Result<CompiledAggregation> {
        let field_index = input_schema.field_index(&descriptor.field)?;
        let input_type = input_schema.fields()[field_index].data_type;
        Ok(CompiledAggregation {
            kind: descriptor.kind,
            field_index,
            result_type: descriptor.result_type(input_type)?,
        })
    }

    pub fn init_state(&self) -> Result<AggregateState> {
        Ok(match self.kind {
            AggregationKind::Sum => AggregateState::Sum(VarVal::zero_of(self.result_type)?),
            AggregationKind::Count => AggregateState::Count(0),
            AggregationKind::Min => AggregateState::Min(None),
            AggregationKind::Max => AggregateState::Max(None),
            AggregationKind::Avg => AggregateState::Avg { sum: 0.0, count: 0 },
        })
    }
}

/// The running value of one aggregation for one key in one slice.
#[derive(Clone, Debug, PartialEq)]
pub enum AggregateState {
    Sum(VarVal),
    Count(u64),
    Min(Option<VarVal>),
    Max(Option<VarVal>),
    Avg { sum: f64, count: u64 },
}

impl AggregateState {
    pub fn update(&mut self, value: &VarVal) -> Result<()> {
        match self {
            AggregateState::Sum(acc) => {
                let widened = acc.add(value)?.cast_to(acc.data_type())?;
                *acc = widened;
            }
            AggregateState::Count(count) => *count += 1,
            AggregateState::Min(slot) => {
                let replace = match slot {
                    Some(current) => value.compare(current)? == std::cmp::Ordering::Less,
                    None => true,
                };
                if replace {
                    *slot = Some(value.clone());
                }
            }
            AggregateState::Max(slot) => {
                let replace = match slot {
                    Some(current) => value.compare(current)? == std::cmp::Ordering::Greater,
                    None => true,
                };
                if replace {
                    *slot = Some(value.clone());
                }
            }
            AggregateState::Avg { sum, count } => {
                let as_float = value.cast_to(DataType::Float64)?;
                *sum += as_float.as_float64().copied().unwrap_or_default();
                *count += 1;
            }
        }
        Ok(())
    }

    /// Combines partial states of the same aggregation, e.g. across worker
    /// partitions or pre-aggregated slices.
    pub fn merge(&mut self, other: &AggregateState) -> Result<()> {
        match (self, other) {
            (AggregateState::Sum(acc), AggregateState::Sum(partial)) => {
                let widened = acc.add(partial)?.cast_to(acc.data_type())?;
                *acc = widened;
            }
            (AggregateState::Count(count), AggregateState::Count(partial)) => {
                *count += partial;
            }
            (AggregateState::Min(slot), AggregateState::Min(partial)) => {
                if let Some(candidate) = partial {
                    let replace = match &slot {
                        Some(current) => {
                            candidate.compare(current)? == std::cmp::Ordering::Less
                        }
                        None => true,
                    };
                    if replace {
                        *slot = Some(candidate.clone());
                    }
                }
            }
            (AggregateState::Max(slot), AggregateState::Max(partial)) => {
                if let Some(candidate) = partial {
                    let replace = match &slot {
                        Some(current) => {
                            candidate.compare(current)? == std::cmp::Ordering::Greater
                        }
                        None => true,
                    };
                    if replace {
                        *slot = Some(candidate.clone());
                    }
                }
            }
            (
                AggregateState::Avg { sum, count },
                AggregateState::Avg {
                    sum: partial_sum,
                    count: partial_count,
                },
            ) => {
                *sum += partial_sum;
                *count += partial_count;
            }
            (state, other) => {
                return Err(StreamError::CorruptOperatorState(format!(
                    "cannot merge aggregate states {state:?} and {other:?}"
                )))
            }
        }
        Ok(())
    }

    pub fn finalize(&self, result_type: DataType) -> Result<VarVal> {
        Ok(match self {
            AggregateState::Sum(acc) => acc.clone(),
            AggregateState::Count(count) => VarVal::UInt64(*count),
            AggregateState::Min(slot) | AggregateState::Max(slot) => match slot {
                Some(value) => value.clone(),
                None => VarVal::zero_of(result_type)?,
            },
            AggregateState::Avg { sum, count } => {
                if *count == 0 {
                    VarVal::Float64(0.0)
                } else {
                    VarVal::Float64(sum / *count as f64)
                }
            }
        })
    }
}

/// Encodes the grouping key of `record` at `key_indices` into comparable
/// bytes. Keys are fixed width; variable-sized grouping keys are rejected at
/// lowering.
pub fn encode_group_key(record: &Record, key_indices: &[usize]) -> Result<Vec<u8>> {
    let mut key = Vec::with_capacity(key_indices.len() * 8);
    for &index in key_indices {
        let value = record.get(index)?;
        let width = value.data_type().size_in_bytes();
        let mut scratch = [0u8; 8];
        value.write_le_bytes(&mut scratch[..width]);
        key.extend_from_slice(&scratch[..width]);
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_widens_and_accumulates() {
        let agg = CompiledAggregation {
            kind: AggregationKind::Sum,
            field_index: 0,
            result_type: DataType::Int64,
        };
        let mut state = agg.init_state().unwrap();
        state.update(&VarVal::Int32(3)).unwrap();
        state.update(&VarVal::Int32(4)).unwrap();
        assert_eq!(
            state.finalize(DataType::Int64).unwrap(),
            VarVal::Int64(7)
        );
    }

    #[test]
    fn min_max_track_extremes() {
        let mut min = AggregateState::Min(None);
        let mut max = AggregateState::Max(None);
        for value in [5i64, 2, 9] {
            min.update(&VarVal::Int64(value)).unwrap();
            max.update(&VarVal::Int64(value)).unwrap();
        }
        assert_eq!(min.finalize(DataType::Int64).unwrap(), VarVal::Int64(2));
        assert_eq!(max.finalize(DataType::Int64).unwrap(), VarVal::Int64(9));
    }

    #[test]
    fn avg_merges_partials() {
        let mut left = AggregateState::Avg { sum: 0.0, count: 0 };
        left.update(&VarVal::Int64(4)).unwrap();
        let mut right = AggregateState::Avg { sum: 0.0, count: 0 };
        right.update(&VarVal::Int64(8)).unwrap();

        left.merge(&right).unwrap();
        assert_eq!(
            left.finalize(DataType::Float64).unwrap(),
            VarVal::Float64(6.0)
        );
    }

    #[test]
    fn mismatched_merge_is_rejected() {
        let mut sum = AggregateState::Sum(VarVal::Int64(1));
        let count = AggregateState::Count(1);
        assert!(sum.merge(&count).is_err());
    }

    #[test]
    fn group_keys_distinguish_values() {
        let a = encode_group_key(
            &Record::new(vec![VarVal::UInt32(1), VarVal::Int64(5)]),
            &[0, 1],
        )
        .unwrap();
        let b = encode_group_key(
            &Record::new(vec![VarVal::UInt32(1), VarVal::Int64(6)]),
            &[0, 1],
        )
        .unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), 4 + 8);
    }
}
