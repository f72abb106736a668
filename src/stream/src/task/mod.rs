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

//! The worker-side runtime: the task queue, plan lowering and the node
//! engine managing local query lifecycles.

mod lowering;
mod node_engine;
mod queue;

pub use lowering::{LoweredQuery, SinkHandle, SourceSpec};
pub use node_engine::NodeEngine;
pub use queue::{FailureFn, RunningPipeline, Task, TaskQueue};
