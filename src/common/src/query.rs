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

//! Query lifecycle vocabulary shared by workers and the query manager.

use serde::{Deserialize, Serialize};

use crate::ids::LocalQueryId;

/// The per-query lifecycle state. Transitions are monotonic, except that a
/// registered query may be unregistered (removed) without ever starting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryState {
    Registered,
    Started,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl QueryState {
    /// Whether the query still occupies runtime resources.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            QueryState::Registered
                | QueryState::Started
                | QueryState::Running
                | QueryState::Stopping
        )
    }

    pub fn is_terminated(&self) -> bool {
        !self.is_active()
    }
}

/// Timestamps (ms since epoch) of the lifecycle transitions a query has
/// passed, plus the error that terminated it, if any.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryMetrics {
    pub start: Option<u64>,
    pub running: Option<u64>,
    pub stop: Option<u64>,
    pub error: Option<String>,
}

/// One worker's view of one query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalQueryStatus {
    pub query_id: LocalQueryId,
    pub state: QueryState,
    pub metrics: QueryMetrics,
}
