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

use rill_common::types::DataType;
use rill_common::CommonError;
use thiserror::Error;

/// A specialized Result type for plan and function operations.
pub type Result<T> = std::result::Result<T, PlanError>;

/// The error type for plan construction, traversal and type inference.
#[derive(Error, Debug)]
pub enum PlanError {
    #[error("Field not found: {0}")]
    FieldNotFound(String),

    #[error("Type mismatch in {context}: {lhs:?} vs {rhs:?}")]
    TypeMismatch {
        context: String,
        lhs: DataType,
        rhs: DataType,
    },

    #[error("Expected stamp {expected:?} in {context}, got {actual:?}")]
    UnexpectedStamp {
        context: String,
        expected: DataType,
        actual: Option<DataType>,
    },

    #[error("Requested type {requested}, but stored type is {stored}")]
    InvalidDynamicCast {
        requested: &'static str,
        stored: &'static str,
    },

    #[error("Operation invoked on a null function")]
    NullFunctionInvoked,

    #[error("{kind} takes {expected} children, got {actual}")]
    WrongNumberOfChildren {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Schemas of union inputs differ: {0} vs {1}")]
    IncompatibleSchemas(String, String),

    #[error("Stamp not inferred yet for {0}")]
    StampNotInferred(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error(transparent)]
    Common(#[from] CommonError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
