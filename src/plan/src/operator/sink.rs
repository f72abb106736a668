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

use std::collections::{BTreeMap, HashMap};

use rill_common::catalog::Schema;
use rill_common::ids::{OperatorId, WorkerId};

use super::{
    expect_children, impl_operator_common, pb_operator, ExplainVerbosity, LogicalOperator,
    OperatorConcept,
};
use crate::error::Result;
use crate::traits::{OutputSchemaTrait, TraitSet};

/// The consuming root of a plan, pinned to the worker hosting the sink.
#[derive(Clone, Debug)]
pub struct SinkOperator {
    id: OperatorId,
    children: Vec<LogicalOperator>,
    traits: TraitSet,
    sink_name: String,
    sink_type: String,
    worker_id: WorkerId,
    config: BTreeMap<String, String>,
}

impl SinkOperator {
    pub fn new(
        sink_name: impl Into<String>,
        sink_type: impl Into<String>,
        worker_id: WorkerId,
    ) -> Self {
        Self {
            id: OperatorId::generate(),
            children: vec![],
            traits: TraitSet::new(),
            sink_name: sink_name.into(),
            sink_type: sink_type.into(),
            worker_id,
            config: BTreeMap::new(),
        }
    }

    pub fn with_config(mut self, config: BTreeMap<String, String>) -> Self {
        self.config = config;
        self
    }

    pub fn sink_name(&self) -> &str {
        &self.sink_name
    }

    pub fn sink_type(&self) -> &str {
        &self.sink_type
    }

    /// The worker this sink is pinned to.
    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    pub fn config(&self) -> &BTreeMap<String, String> {
        &self.config
    }

    fn payload_eq(&self, other: &Self) -> bool {
        self.sink_name == other.sink_name
            && self.sink_type == other.sink_type
            && self.worker_id == other.worker_id
            && self.config == other.config
    }
}

impl OperatorConcept for SinkOperator {
    impl_operator_common!(SinkOperator, "Sink");

    fn explain(&self, verbosity: ExplainVerbosity) -> String {
        match verbosity {
            ExplainVerbosity::Short => format!("Sink({})", self.sink_name),
            ExplainVerbosity::Debug => format!(
                "Sink({} type={} worker={})",
                self.sink_name, self.sink_type, self.worker_id
            ),
        }
    }

    fn infer_output_schema(&self, child_schemas: &[Schema]) -> Result<LogicalOperator> {
        expect_children("Sink", 1, child_schemas)?;
        let traits = self
            .trait_set()
            .with(OutputSchemaTrait(child_schemas[0].clone()));
        Ok(self.with_trait_set(traits))
    }

    fn serialize(&self) -> rill_pb::PbLogicalOperator {
        let mut attributes = HashMap::new();
        attributes.insert("sink_name".to_owned(), self.sink_name.clone());
        attributes.insert("sink_type".to_owned(), self.sink_type.clone());
        attributes.insert("worker_id".to_owned(), self.worker_id.to_string());
        pb_operator(self, vec![], attributes)
    }
}
