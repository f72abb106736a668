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

use rill_common::CommonError;
use thiserror::Error;

/// A specialized Result type for connector operations.
pub type Result<T> = std::result::Result<T, ConnectorError>;

/// The error type for plugin validation, catalogs and data parsing.
#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("Invalid config parameter {name}: {reason}")]
    InvalidConfigParameter { name: String, reason: String },

    #[error("Unknown source type: {0}")]
    UnknownSourceType(String),

    #[error("Unknown sink type: {0}")]
    UnknownSinkType(String),

    #[error("Unknown logical source: {0}")]
    UnknownLogicalSource(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Common(#[from] CommonError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
