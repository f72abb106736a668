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

use thiserror::Error;

use crate::types::DataType;

/// A specialized Result type for operations on the shared foundations.
pub type Result<T> = std::result::Result<T, CommonError>;

/// The error type shared across the memory system, the schema model and the
/// record views.
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("Cannot allocate buffer of size {0}")]
    CannotAllocateBuffer(usize),

    #[error("Tuple of size {tuple_size} does not fit into a buffer of size {buffer_size}")]
    TuplesTooLargeForBufferSize {
        tuple_size: usize,
        buffer_size: usize,
    },

    #[error("Unknown data type: {0}")]
    UnknownDataType(String),

    #[error("Field not found: {0}")]
    FieldNotFound(String),

    #[error("Duplicate field name in schema: {0}")]
    DuplicateField(String),

    #[error("No child buffer at index {index}, buffer has {count} children")]
    ChildBufferNotFound { index: u32, count: u32 },

    #[error("Access at offset {offset} with length {len} exceeds buffer size {buffer_size}")]
    BufferOutOfBounds {
        offset: usize,
        len: usize,
        buffer_size: usize,
    },

    #[error("Cannot {op} {lhs:?} and {rhs:?}")]
    IncompatibleTypes {
        op: &'static str,
        lhs: DataType,
        rhs: DataType,
    },

    #[error("Invalid config parameter {name}: {reason}")]
    InvalidConfigParameter { name: String, reason: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
