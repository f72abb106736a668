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

//! The tuple buffer memory system.
//!
//! A [`BufferManager`] owns a fixed number of fixed-size memory segments.
//! [`TupleBuffer`] handles are reference counted; a segment returns to its
//! pool when the last handle is released. Payloads that do not fit inline
//! travel in chained child buffers addressed by [`VariableSizedAccess`].

mod manager;
mod tuple_buffer;
mod var_sized;

pub use manager::{BufferManager, BufferProvider, LocalBufferPool};
pub use tuple_buffer::TupleBuffer;
pub use var_sized::{
    read_var_sized, read_var_sized_with_length_prefix, write_var_sized,
    write_var_sized_with_length_prefix, VariableSizedAccess,
};
