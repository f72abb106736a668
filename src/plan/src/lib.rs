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

//! The logical query plan layer: an immutable operator DAG with value
//! semantics, the type-erased function trees attached to its operators, and
//! the traversal and mutation operations the rewrite stages build on.

pub mod builder;
pub mod error;
pub mod function;
pub mod operator;
pub mod plan;
pub mod traits;
pub mod window;

pub use error::{PlanError, Result};
pub use function::Function;
pub use operator::{ExplainVerbosity, LogicalOperator};
pub use plan::LogicalPlan;
pub use traits::TraitSet;
