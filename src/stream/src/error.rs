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

use rill_common::ids::{LocalQueryId, OriginId};
use rill_common::CommonError;
use thiserror::Error;

/// A specialized Result type for runtime operations.
pub type Result<T> = std::result::Result<T, StreamError>;

/// The error type for sources, pipelines and the node engine.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Source {0} was stopped before it ever started")]
    StopBeforeStartFailure(OriginId),

    #[error("Running routine of source {origin} failed: {reason}")]
    RunningRoutineFailure { origin: OriginId, reason: String },

    #[error("Source {0} cannot produce a buffer")]
    CannotProduceSourceBuffer(OriginId),

    #[error("Source {origin} did not stop within {timeout_ms} ms")]
    SourceStopTimeout { origin: OriginId, timeout_ms: u64 },

    #[error("Query {0} not found on this worker")]
    QueryNotFound(LocalQueryId),

    #[error("Query {query_id} cannot {operation} while {state:?}")]
    InvalidQueryStateTransition {
        query_id: LocalQueryId,
        operation: &'static str,
        state: rill_common::query::QueryState,
    },

    #[error("Unsupported plan feature: {0}")]
    UnsupportedQuery(String),

    #[error("Corrupt operator state: {0}")]
    CorruptOperatorState(String),

    #[error(transparent)]
    Plan(#[from] rill_plan::PlanError),

    #[error(transparent)]
    Connector(#[from] rill_connector::ConnectorError),

    #[error(transparent)]
    Common(#[from] CommonError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Clone for StreamError {
    /// Errors cross the source emission channel and are recorded per query;
    /// a rendered clone is sufficient for everything but the original site.
    fn clone(&self) -> Self {
        match self {
            StreamError::StopBeforeStartFailure(origin) => {
                StreamError::StopBeforeStartFailure(*origin)
            }
            StreamError::RunningRoutineFailure { origin, reason } => {
                StreamError::RunningRoutineFailure {
                    origin: *origin,
                    reason: reason.clone(),
                }
            }
            StreamError::CannotProduceSourceBuffer(origin) => {
                StreamError::CannotProduceSourceBuffer(*origin)
            }
            StreamError::SourceStopTimeout { origin, timeout_ms } => {
                StreamError::SourceStopTimeout {
                    origin: *origin,
                    timeout_ms: *timeout_ms,
                }
            }
            StreamError::QueryNotFound(id) => StreamError::QueryNotFound(*id),
            StreamError::InvalidQueryStateTransition {
                query_id,
                operation,
                state,
            } => StreamError::InvalidQueryStateTransition {
                query_id: *query_id,
                operation,
                state: *state,
            },
            StreamError::UnsupportedQuery(reason) => {
                StreamError::UnsupportedQuery(reason.clone())
            }
            StreamError::CorruptOperatorState(reason) => {
                StreamError::CorruptOperatorState(reason.clone())
            }
            other => StreamError::Internal(anyhow::anyhow!("{other}")),
        }
    }
}
