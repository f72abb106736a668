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

//! The plan rewrite stages, the placement solver and the decomposition of
//! placed plans into per-worker subplans.

pub mod distribute;
pub mod error;
pub mod placement;
pub mod stage;
pub mod topology;

pub use error::{OptimizerError, Result};
pub use stage::{DistributedLogicalPlan, OptimizedLogicalPlan, PlacedLogicalPlan};
pub use topology::Topology;
