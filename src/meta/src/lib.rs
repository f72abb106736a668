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

//! Cluster-side query lifecycle management: the per-query state machine,
//! fan-out to worker submission backends and aggregated status reporting.

pub mod backend;
pub mod error;
pub mod manager;

pub use backend::{EmbeddedWorkerBackend, QuerySubmissionBackend};
pub use error::{MetaError, Result};
pub use manager::{GlobalQueryStatus, QueryManager, WorkerStatus};
