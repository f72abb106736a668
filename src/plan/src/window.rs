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

//! Window and time descriptors carried by windowed operators.

use serde::{Deserialize, Serialize};

/// Scale of an event-time field, normalized to milliseconds at extraction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeUnit {
    Milliseconds,
    Seconds,
    Minutes,
}

impl TimeUnit {
    pub fn to_millis_factor(&self) -> u64 {
        match self {
            TimeUnit::Milliseconds => 1,
            TimeUnit::Seconds => 1_000,
            TimeUnit::Minutes => 60_000,
        }
    }
}

/// Where a record's timestamp comes from.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeCharacteristic {
    /// The system time at which the worker observes the record.
    IngestionTime,
    /// A designated field of the record.
    EventTime { field: String, unit: TimeUnit },
}

/// The shape of the window assigned to each record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WindowType {
    Tumbling { size_ms: u64 },
    Sliding { size_ms: u64, slide_ms: u64 },
}

impl WindowType {
    pub fn size_ms(&self) -> u64 {
        match self {
            WindowType::Tumbling { size_ms } => *size_ms,
            WindowType::Sliding { size_ms, .. } => *size_ms,
        }
    }

    pub fn slide_ms(&self) -> u64 {
        match self {
            WindowType::Tumbling { size_ms } => *size_ms,
            WindowType::Sliding { slide_ms, .. } => *slide_ms,
        }
    }

    /// The width of the minimal state interval: the whole window for
    /// tumbling windows, `gcd(size, slide)` for sliding windows.
    pub fn slice_width_ms(&self) -> u64 {
        match self {
            WindowType::Tumbling { size_ms } => *size_ms,
            WindowType::Sliding { size_ms, slide_ms } => gcd(*size_ms, *slide_ms),
        }
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// The complete window descriptor of a windowed operator.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowSpec {
    pub time: TimeCharacteristic,
    pub window: WindowType,
}

impl WindowSpec {
    pub fn tumbling_event_time(field: impl Into<String>, unit: TimeUnit, size_ms: u64) -> Self {
        Self {
            time: TimeCharacteristic::EventTime {
                field: field.into(),
                unit,
            },
            window: WindowType::Tumbling { size_ms },
        }
    }

    pub fn tumbling_ingestion_time(size_ms: u64) -> Self {
        Self {
            time: TimeCharacteristic::IngestionTime,
            window: WindowType::Tumbling { size_ms },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_width_of_sliding_window_is_gcd() {
        let sliding = WindowType::Sliding {
            size_ms: 1000,
            slide_ms: 250,
        };
        assert_eq!(sliding.slice_width_ms(), 250);

        let coprime = WindowType::Sliding {
            size_ms: 1000,
            slide_ms: 300,
        };
        assert_eq!(coprime.slice_width_ms(), 100);

        let tumbling = WindowType::Tumbling { size_ms: 1000 };
        assert_eq!(tumbling.slice_width_ms(), 1000);
    }
}
