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

//! The catalog of logical sources and their registered physical sources.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rill_common::catalog::{LogicalSource, ParserConfig, Schema, SourceDescriptor};
use rill_common::ids::{PhysicalSourceId, WorkerId};

use crate::error::{ConnectorError, Result};
use crate::source::validate_and_format;

/// Maps globally unique logical source names to schemas and physical
/// sources. Shared between the binder, the rewrite stages and the workers.
#[derive(Debug, Default)]
pub struct SourceCatalog {
    state: Mutex<CatalogState>,
    next_physical_source_id: AtomicU64,
}

#[derive(Debug, Default)]
struct CatalogState {
    logical_sources: HashMap<String, LogicalSource>,
    physical_sources: HashMap<String, Vec<SourceDescriptor>>,
}

impl SourceCatalog {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CatalogState::default()),
            next_physical_source_id: AtomicU64::new(1),
        }
    }

    /// Registers a logical source. Names are globally unique: a duplicate
    /// insertion returns `None`.
    pub fn add_logical_source(&self, name: &str, schema: Schema) -> Option<LogicalSource> {
        let mut state = self.state.lock();
        if state.logical_sources.contains_key(name) {
            tracing::debug!(name, "logical source already exists");
            return None;
        }
        let logical = LogicalSource::new(name, schema);
        state.logical_sources.insert(name.to_owned(), logical.clone());
        state.physical_sources.insert(name.to_owned(), vec![]);
        Some(logical)
    }

    /// Registers a physical source of `logical_source`, validating its
    /// configuration against the plugin registry and assigning a monotonic
    /// physical source id.
    pub fn add_physical_source(
        &self,
        logical_source: &LogicalSource,
        source_type: &str,
        worker_id: WorkerId,
        config: BTreeMap<String, String>,
        parser_config: ParserConfig,
    ) -> Result<SourceDescriptor> {
        let mut state = self.state.lock();
        let entries = state
            .physical_sources
            .get_mut(&logical_source.name)
            .ok_or_else(|| ConnectorError::UnknownLogicalSource(logical_source.name.clone()))?;

        let buffers_in_local_pool = config
            .get("buffers_in_local_pool")
            .map(|raw| {
                raw.parse::<usize>()
                    .map_err(|_| ConnectorError::InvalidConfigParameter {
                        name: "buffers_in_local_pool".into(),
                        reason: format!("not a number: {raw}"),
                    })
            })
            .transpose()?;

        let validated_config = validate_and_format(source_type, config)?;

        let id = PhysicalSourceId::new(self.next_physical_source_id.fetch_add(1, Ordering::Relaxed));
        let descriptor = SourceDescriptor {
            physical_source_id: id,
            logical_source: logical_source.clone(),
            worker_id,
            source_type: source_type.to_owned(),
            buffers_in_local_pool,
            config: validated_config,
            parser_config,
        };
        entries.push(descriptor.clone());
        tracing::debug!(
            source_type,
            %worker_id,
            physical_source_id = %id,
            "registered physical source"
        );
        Ok(descriptor)
    }

    pub fn get_logical_source(&self, name: &str) -> Option<LogicalSource> {
        self.state.lock().logical_sources.get(name).cloned()
    }

    /// All physical sources registered for `name`, in registration order.
    pub fn physical_sources_of(&self, name: &str) -> Result<Vec<SourceDescriptor>> {
        self.state
            .lock()
            .physical_sources
            .get(name)
            .cloned()
            .ok_or_else(|| ConnectorError::UnknownLogicalSource(name.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use rill_common::catalog::Field;
    use rill_common::types::DataType;

    use super::*;

    fn schema() -> Schema {
        Schema::new(vec![Field::new("id", DataType::UInt32)]).unwrap()
    }

    fn inline_config() -> BTreeMap<String, String> {
        BTreeMap::from([("payload".to_owned(), "1\n".to_owned())])
    }

    #[test]
    fn duplicate_logical_source_returns_none() {
        let catalog = SourceCatalog::new();
        assert!(catalog.add_logical_source("cars", schema()).is_some());
        assert!(catalog.add_logical_source("cars", schema()).is_none());
    }

    #[test]
    fn physical_source_ids_are_monotonic() {
        let catalog = SourceCatalog::new();
        let logical = catalog.add_logical_source("cars", schema()).unwrap();
        let first = catalog
            .add_physical_source(
                &logical,
                "Inline",
                WorkerId::new(1),
                inline_config(),
                ParserConfig::default(),
            )
            .unwrap();
        let second = catalog
            .add_physical_source(
                &logical,
                "Inline",
                WorkerId::new(2),
                inline_config(),
                ParserConfig::default(),
            )
            .unwrap();
        assert!(first.physical_source_id < second.physical_source_id);
        assert_eq!(catalog.physical_sources_of("cars").unwrap().len(), 2);
    }

    #[test]
    fn physical_source_for_unknown_logical_source_fails() {
        let catalog = SourceCatalog::new();
        let unregistered = LogicalSource::new("ghost", schema());
        assert!(matches!(
            catalog.add_physical_source(
                &unregistered,
                "Inline",
                WorkerId::new(1),
                inline_config(),
                ParserConfig::default(),
            ),
            Err(ConnectorError::UnknownLogicalSource(_))
        ));
    }

    #[test]
    fn invalid_plugin_config_is_rejected() {
        let catalog = SourceCatalog::new();
        let logical = catalog.add_logical_source("cars", schema()).unwrap();
        assert!(matches!(
            catalog.add_physical_source(
                &logical,
                "TCP",
                WorkerId::new(1),
                BTreeMap::new(), // missing host/port
                ParserConfig::default(),
            ),
            Err(ConnectorError::InvalidConfigParameter { .. })
        ));
    }
}
