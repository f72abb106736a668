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

//! The source plugin contract and registry.

mod inline;
mod tcp;

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use parking_lot::RwLock;
use rill_common::buffer::{BufferProvider, TupleBuffer};
use rill_common::catalog::SourceDescriptor;
use rill_common::util::StopToken;

pub use inline::InlineSource;
pub use tcp::TcpSource;

use crate::error::{ConnectorError, Result};

/// What one `fill_tuple_buffer` call produced.
#[derive(Debug, PartialEq, Eq)]
pub enum SourceFill {
    /// The buffer now carries `bytes_written` bytes of tuples; zero is legal
    /// and simply skipped by the source thread.
    Data { bytes_written: usize },
    /// The source is exhausted; the thread shuts down gracefully.
    EndOfStream,
}

/// A source plugin instance, owned by exactly one source thread.
pub trait Source: Send + std::fmt::Debug {
    /// One-time setup before the first fill.
    fn open(&mut self, provider: &dyn BufferProvider) -> Result<()>;

    /// Fills `buffer` with tuples. May suspend, and must honour `stop`:
    /// a cancelled token makes the call return promptly with whatever has
    /// been written so far.
    fn fill_tuple_buffer(
        &mut self,
        buffer: &TupleBuffer,
        provider: &dyn BufferProvider,
        stop: &StopToken,
    ) -> Result<SourceFill>;

    /// Releases external resources.
    fn close(&mut self) -> Result<()>;
}

type SourceFactory = fn(&SourceDescriptor) -> Result<Box<dyn Source>>;
type ConfigValidator = fn(BTreeMap<String, String>) -> Result<BTreeMap<String, String>>;

struct SourcePlugin {
    factory: SourceFactory,
    validator: ConfigValidator,
}

/// The process-wide source plugin registry, keyed by source type name.
struct SourcePluginRegistry {
    plugins: RwLock<HashMap<&'static str, SourcePlugin>>,
}

static REGISTRY: LazyLock<SourcePluginRegistry> = LazyLock::new(|| {
    let registry = SourcePluginRegistry {
        plugins: RwLock::new(HashMap::new()),
    };
    registry.plugins.write().insert(
        "TCP",
        SourcePlugin {
            factory: tcp::TcpSource::from_descriptor,
            validator: tcp::TcpSource::validate_and_format,
        },
    );
    registry.plugins.write().insert(
        "Inline",
        SourcePlugin {
            factory: inline::InlineSource::from_descriptor,
            validator: inline::InlineSource::validate_and_format,
        },
    );
    registry
});

/// Validates a raw string configuration for `source_type`, returning the
/// normalized configuration the descriptor stores.
pub fn validate_and_format(
    source_type: &str,
    config: BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>> {
    let plugins = REGISTRY.plugins.read();
    let plugin = plugins
        .get(source_type)
        .ok_or_else(|| ConnectorError::UnknownSourceType(source_type.to_owned()))?;
    (plugin.validator)(config)
}

/// Instantiates the plugin named by `descriptor.source_type`.
pub fn create_source(descriptor: &SourceDescriptor) -> Result<Box<dyn Source>> {
    let plugins = REGISTRY.plugins.read();
    let plugin = plugins
        .get(descriptor.source_type.as_str())
        .ok_or_else(|| ConnectorError::UnknownSourceType(descriptor.source_type.clone()))?;
    (plugin.factory)(descriptor)
}

pub(crate) fn require_config<'a>(
    config: &'a BTreeMap<String, String>,
    key: &str,
) -> Result<&'a str> {
    config
        .get(key)
        .map(|s| s.as_str())
        .ok_or_else(|| ConnectorError::InvalidConfigParameter {
            name: key.to_owned(),
            reason: "missing".to_owned(),
        })
}
