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

//! Named, typed fields and the schema value type.

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::{CommonError, Result};
use crate::types::DataType;

/// A named, typed field of a schema.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.data_type)
    }
}

/// Physical layout preference for buffers carrying tuples of a schema.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryLayoutHint {
    #[default]
    RowLayout,
    ColumnarLayout,
}

/// An ordered sequence of uniquely named fields.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<Field>,
    layout_hint: MemoryLayoutHint,
}

impl Schema {
    pub fn empty() -> Self {
        Self {
            fields: vec![],
            layout_hint: MemoryLayoutHint::default(),
        }
    }

    /// Builds a schema, rejecting duplicate field names.
    pub fn new(fields: Vec<Field>) -> Result<Self> {
        if let Some(dup) = fields.iter().map(|f| &f.name).duplicates().next() {
            return Err(CommonError::DuplicateField(dup.clone()));
        }
        Ok(Self {
            fields,
            layout_hint: MemoryLayoutHint::default(),
        })
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn layout_hint(&self) -> MemoryLayoutHint {
        self.layout_hint
    }

    pub fn with_layout_hint(mut self, hint: MemoryLayoutHint) -> Self {
        self.layout_hint = hint;
        self
    }

    /// The inline width of one tuple.
    pub fn size_of_schema_in_bytes(&self) -> usize {
        self.fields.iter().map(|f| f.data_type.size_in_bytes()).sum()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    pub fn get_field(&self, name: &str) -> Result<&Field> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| CommonError::FieldNotFound(name.to_owned()))
    }

    pub fn field_index(&self, name: &str) -> Result<usize> {
        self.fields
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| CommonError::FieldNotFound(name.to_owned()))
    }

    /// Returns a new schema with `field` appended, rejecting duplicates.
    pub fn with_field_appended(&self, field: Field) -> Result<Schema> {
        let mut fields = self.fields.clone();
        fields.push(field);
        Schema::new(fields).map(|s| s.with_layout_hint(self.layout_hint))
    }

    /// Returns a new schema with every field renamed to `<prefix>.<name>`.
    /// Used to disambiguate the two sides of a join output.
    pub fn with_fields_renamed_by_prefix(&self, prefix: &str) -> Schema {
        Schema {
            fields: self
                .fields
                .iter()
                .map(|f| Field::new(format!("{prefix}.{}", f.name), f.data_type))
                .collect(),
            layout_hint: self.layout_hint,
        }
    }
}

impl std::fmt::Display for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Schema({})", self.fields.iter().join(", "))
    }
}

/// A named stream with a schema, as registered in the source catalog.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogicalSource {
    pub name: String,
    pub schema: Schema,
}

impl LogicalSource {
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }
}

/// How a byte-stream source's payload is tokenized into tuples.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParserConfig {
    /// The input format; only `CSV` is built in.
    pub parser_type: String,
    pub field_delimiter: char,
    pub tuple_delimiter: char,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            parser_type: "CSV".into(),
            field_delimiter: ',',
            tuple_delimiter: '\n',
        }
    }
}

/// One registered physical source of a logical source: the plugin type, the
/// worker that hosts it, and its validated configuration.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub physical_source_id: crate::ids::PhysicalSourceId,
    pub logical_source: LogicalSource,
    pub worker_id: crate::ids::WorkerId,
    pub source_type: String,
    /// Buffers reserved for the source-local pool; `None` falls back to the
    /// engine config.
    pub buffers_in_local_pool: Option<usize>,
    pub config: std::collections::BTreeMap<String, String>,
    pub parser_config: ParserConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_schema() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::UInt32),
            Field::new("value", DataType::UInt64),
            Field::new("tag", DataType::VarSized),
        ])
        .unwrap()
    }

    #[test]
    fn duplicate_field_names_are_rejected() {
        let err = Schema::new(vec![
            Field::new("id", DataType::UInt32),
            Field::new("id", DataType::Int64),
        ])
        .unwrap_err();
        assert!(matches!(err, CommonError::DuplicateField(name) if name == "id"));
    }

    #[test]
    fn size_and_lookup() {
        let schema = test_schema();
        assert_eq!(schema.size_of_schema_in_bytes(), 4 + 8 + 8);
        assert_eq!(schema.field_index("value").unwrap(), 1);
        assert!(matches!(
            schema.get_field("missing"),
            Err(CommonError::FieldNotFound(_))
        ));
    }

    #[test]
    fn prefix_rename_keeps_types() {
        let renamed = test_schema().with_fields_renamed_by_prefix("left");
        assert_eq!(renamed.fields()[0].name, "left.id");
        assert_eq!(renamed.fields()[0].data_type, DataType::UInt32);
    }
}
