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

//! The per-worker streaming execution runtime: source threads with
//! backpressure, push-based pipelines, windowed aggregation and join state,
//! and the node engine tying them to the query lifecycle.

pub mod aggregation;
pub mod error;
pub mod executor;
pub mod expression;
pub mod join;
pub mod source;
pub mod task;
pub mod window;

pub use error::{Result, StreamError};
pub use task::NodeEngine;
