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

use rill_common::catalog::Schema;
use rill_common::record::Record;
use rill_common::types::{DataType, VarVal};
use rill_plan::window::TimeCharacteristic;

use crate::error::{Result, StreamError};
use crate::executor::ExecutionContext;

/// Extracts a record's timestamp in milliseconds.
#[derive(Debug)]
pub enum TimeFunction {
    /// The system time at which the worker processes the record.
    IngestionTime,
    /// A designated record field, scaled to milliseconds.
    EventTime {
        field_index: usize,
        to_millis_factor: u64,
    },
}

impl TimeFunction {
    pub fn build(time: &TimeCharacteristic, input_schema: &Schema) -> Result<TimeFunction> {
        match time {
            TimeCharacteristic::IngestionTime => Ok(TimeFunction::IngestionTime),
            TimeCharacteristic::EventTime { field, unit } => {
                let index = input_schema.field_index(field)?;
                let data_type = input_schema.fields()[index].data_type;
                if !data_type.is_integer() {
                    return Err(StreamError::UnsupportedQuery(format!(
                        "event time field {field} must be an integer, got {data_type}"
                    )));
                }
                Ok(TimeFunction::EventTime {
                    field_index: index,
                    to_millis_factor: unit.to_millis_factor(),
                })
            }
        }
    }

    pub fn extract(&self, ctx: &ExecutionContext<'_>, record: &Record) -> Result<u64> {
        match self {
            TimeFunction::IngestionTime => Ok(ctx.current_system_time_ms()),
            TimeFunction::EventTime {
                field_index,
                to_millis_factor,
            } => {
                let value = record.get(*field_index)?.cast_to(DataType::UInt64)?;
                match value {
                    VarVal::UInt64(ts) => Ok(ts * to_millis_factor),
                    _ => unreachable!("cast_to(UInt64) yields a UInt64"),
                }
            }
        }
    }
}
