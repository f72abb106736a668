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

//! Rewrite stages over logical plans.
//!
//! Stages are pure functions; the structurally typed wrappers below make
//! mis-sequencing (placing an un-optimized plan, distributing an un-placed
//! one) a compile error rather than a runtime surprise.

pub mod memory_layout;
pub mod predicate_reordering;
pub mod signature;
pub mod source_expansion;
pub mod type_inference;
pub mod window_distribution;

use std::sync::Arc;

use rill_common::catalog::MemoryLayoutHint;
use rill_common::ids::WorkerId;
use rill_connector::SourceCatalog;
use rill_plan::LogicalPlan;

use crate::error::Result;

/// A plan that has passed every rewrite stage and carries inferred schemas.
#[derive(Clone, Debug, PartialEq)]
pub struct OptimizedLogicalPlan {
    pub plan: LogicalPlan,
}

/// An optimized plan whose operators all carry a placement trait.
#[derive(Clone, Debug, PartialEq)]
pub struct PlacedLogicalPlan {
    pub plan: LogicalPlan,
}

/// One worker's share of a decomposed plan.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkerSubPlan {
    pub worker_id: WorkerId,
    pub plan: LogicalPlan,
}

/// The decomposed per-worker subplans plus the optimized plan they came
/// from; this is what gets submitted.
#[derive(Clone, Debug, PartialEq)]
pub struct DistributedLogicalPlan {
    pub subplans: Vec<WorkerSubPlan>,
    pub optimized: LogicalPlan,
}

/// Policy knobs of the rewrite pipeline.
#[derive(Clone, Copy, Debug)]
pub struct OptimizerPolicy {
    /// Duplicate non-blocking operator chains per (sink, physical source)
    /// pair during logical-source expansion instead of unioning right above
    /// the sources.
    pub duplicate_intermediate_subtrees: bool,
    /// Buffer layout selected for every operator.
    pub memory_layout: MemoryLayoutHint,
}

impl Default for OptimizerPolicy {
    fn default() -> Self {
        Self {
            duplicate_intermediate_subtrees: false,
            memory_layout: MemoryLayoutHint::RowLayout,
        }
    }
}

/// Runs the rewrite stages in their canonical order.
#[derive(Clone)]
pub struct Optimizer {
    catalog: Arc<SourceCatalog>,
    policy: OptimizerPolicy,
}

impl Optimizer {
    pub fn new(catalog: Arc<SourceCatalog>) -> Self {
        Self {
            catalog,
            policy: OptimizerPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: OptimizerPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn optimize(&self, plan: &LogicalPlan) -> Result<OptimizedLogicalPlan> {
        let plan = source_expansion::expand_logical_sources(
            plan,
            &self.catalog,
            self.policy.duplicate_intermediate_subtrees,
        )?;
        let plan = predicate_reordering::reorder_predicates(&plan);
        let plan = window_distribution::distribute_windows(&plan)?;
        let plan = type_inference::infer_types(&plan)?;
        let plan = memory_layout::select_memory_layout(&plan, self.policy.memory_layout)?;
        let plan = signature::infer_signatures(&plan)?;
        tracing::debug!(query_id = %plan.query_id(), "optimized plan:\n{plan}");
        Ok(OptimizedLogicalPlan { plan })
    }
}
