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

//! Windowing machinery: time extraction, slice stores and multi-origin
//! watermark tracking.

mod slice_store;
mod time_function;
mod watermark;

pub use slice_store::{SliceStore, WindowSlice};
pub use time_function::TimeFunction;
pub use watermark::WatermarkProcessor;
