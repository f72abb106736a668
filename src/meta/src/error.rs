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

use rill_common::ids::{QueryId, WorkerId};
use thiserror::Error;

/// A specialized Result type for query management operations.
pub type Result<T> = std::result::Result<T, MetaError>;

/// The error type for the query manager and submission backends.
#[derive(Error, Debug)]
pub enum MetaError {
    #[error("Query {0} not found")]
    QueryNotFound(QueryId),

    #[error("No submission backend registered for worker {0}")]
    UnknownWorker(WorkerId),

    #[error("Invalid query syntax: {0}")]
    InvalidQuerySyntax(String),

    #[error("Unsupported query: {0}")]
    UnsupportedQuery(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error(transparent)]
    Optimizer(#[from] rill_optimizer::OptimizerError),

    #[error(transparent)]
    Backend(#[from] rill_stream::StreamError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
