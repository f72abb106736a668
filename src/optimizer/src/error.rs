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

use rill_plan::PlanError;
use thiserror::Error;

/// A specialized Result type for rewrite and placement operations.
pub type Result<T> = std::result::Result<T, OptimizerError>;

/// The error type for the optimization pipeline.
#[derive(Error, Debug)]
pub enum OptimizerError {
    #[error("Placement failed: {0}")]
    PlacementFailure(String),

    #[error("Unsupported query: {0}")]
    UnsupportedQuery(String),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Connector(#[from] rill_connector::ConnectorError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
