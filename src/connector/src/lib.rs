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

//! Source and sink plugins, their registries, and the source catalog.
//!
//! Plugins are the engine's only contact with the outside world. A source
//! fills tuple buffers and honours stop tokens; a sink consumes result
//! buffers. The registries are the sanctioned process-wide singletons; the
//! catalog maps logical sources to their registered physical sources.

pub mod catalog;
pub mod error;
pub mod parser;
pub mod sink;
pub mod source;
pub mod wire;

pub use catalog::SourceCatalog;
pub use error::{ConnectorError, Result};
