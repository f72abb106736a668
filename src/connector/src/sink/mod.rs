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

//! The sink plugin contract and registry.

mod collect;
mod file;

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use parking_lot::RwLock;
use rill_common::buffer::TupleBuffer;
use rill_common::catalog::Schema;

pub use collect::{collected_results, CollectSink};
pub use file::FileSink;

use crate::error::{ConnectorError, Result};

/// A sink plugin instance: the terminal consumer of result buffers.
pub trait Sink: Send + std::fmt::Debug {
    fn open(&mut self) -> Result<()>;

    fn consume(&mut self, buffer: &TupleBuffer) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

type SinkFactory =
    fn(name: &str, schema: &Schema, config: &BTreeMap<String, String>) -> Result<Box<dyn Sink>>;

/// The process-wide sink plugin registry, keyed by sink type name.
struct SinkPluginRegistry {
    plugins: RwLock<HashMap<&'static str, SinkFactory>>,
}

static REGISTRY: LazyLock<SinkPluginRegistry> = LazyLock::new(|| {
    let registry = SinkPluginRegistry {
        plugins: RwLock::new(HashMap::new()),
    };
    registry
        .plugins
        .write()
        .insert("Collect", collect::CollectSink::from_config as SinkFactory);
    registry
        .plugins
        .write()
        .insert("File", file::FileSink::from_config as SinkFactory);
    registry
});

/// Instantiates the sink plugin registered under `sink_type`.
pub fn create_sink(
    sink_type: &str,
    name: &str,
    schema: &Schema,
    config: &BTreeMap<String, String>,
) -> Result<Box<dyn Sink>> {
    let plugins = REGISTRY.plugins.read();
    let factory = plugins
        .get(sink_type)
        .ok_or_else(|| ConnectorError::UnknownSinkType(sink_type.to_owned()))?;
    factory(name, schema, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_sink_type_is_rejected() {
        assert!(matches!(
            create_sink("Telegraph", "out", &Schema::empty(), &BTreeMap::new()),
            Err(ConnectorError::UnknownSinkType(_))
        ));
    }
}
