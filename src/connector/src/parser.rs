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

//! Tokenizes raw source bytes into records.

use rill_common::catalog::{ParserConfig, Schema};
use rill_common::record::Record;
use rill_common::types::VarVal;

use crate::error::{ConnectorError, Result};

/// An incremental CSV tokenizer. Byte-stream sources feed arbitrary chunks;
/// complete tuples come out as soon as their delimiter has arrived.
#[derive(Debug)]
pub struct CsvTupleParser {
    schema: Schema,
    config: ParserConfig,
    residual: Vec<u8>,
}

impl CsvTupleParser {
    pub fn new(schema: Schema, config: ParserConfig) -> Result<Self> {
        if config.parser_type != "CSV" {
            return Err(ConnectorError::InvalidConfigParameter {
                name: "parser_type".into(),
                reason: format!("unsupported parser {}", config.parser_type),
            });
        }
        Ok(Self {
            schema,
            config,
            residual: vec![],
        })
    }

    /// Appends a chunk of raw bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.residual.extend_from_slice(bytes);
    }

    /// Pops the next complete tuple, or `None` until more bytes arrive.
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        let delimiter = self.config.tuple_delimiter as u8;
        let Some(end) = self.residual.iter().position(|&b| b == delimiter) else {
            return Ok(None);
        };
        let line: Vec<u8> = self.residual.drain(..=end).take(end).collect();
        if line.is_empty() {
            // A bare delimiter carries no tuple.
            return self.next_record();
        }
        self.parse_line(&line).map(Some)
    }

    fn parse_line(&self, line: &[u8]) -> Result<Record> {
        let text = std::str::from_utf8(line)
            .map_err(|e| ConnectorError::Parse(format!("invalid utf-8 tuple: {e}")))?;
        let fields: Vec<&str> = text.split(self.config.field_delimiter).collect();
        if fields.len() != self.schema.len() {
            return Err(ConnectorError::Parse(format!(
                "expected {} fields, got {} in {text:?}",
                self.schema.len(),
                fields.len()
            )));
        }
        let mut values = Vec::with_capacity(fields.len());
        for (field, text) in self.schema.fields().iter().zip(fields) {
            let value = VarVal::parse_str(field.data_type, text)
                .map_err(|e| ConnectorError::Parse(e.to_string()))?;
            values.push(value);
        }
        Ok(Record::new(values))
    }
}

#[cfg(test)]
mod tests {
    use rill_common::catalog::Field;
    use rill_common::types::DataType;

    use super::*;

    fn parser() -> CsvTupleParser {
        let schema = Schema::new(vec![
            Field::new("a", DataType::Int32),
            Field::new("b", DataType::Int32),
            Field::new("c", DataType::Int32),
        ])
        .unwrap();
        CsvTupleParser::new(schema, ParserConfig::default()).unwrap()
    }

    #[test]
    fn parses_complete_tuples_across_chunks() {
        let mut parser = parser();
        parser.feed(b"1,2,");
        assert!(parser.next_record().unwrap().is_none());

        parser.feed(b"3\n2,3,4\n");
        assert_eq!(
            parser.next_record().unwrap().unwrap(),
            Record::new(vec![VarVal::Int32(1), VarVal::Int32(2), VarVal::Int32(3)])
        );
        assert_eq!(
            parser.next_record().unwrap().unwrap(),
            Record::new(vec![VarVal::Int32(2), VarVal::Int32(3), VarVal::Int32(4)])
        );
        assert!(parser.next_record().unwrap().is_none());
    }

    #[test]
    fn field_count_mismatch_is_a_parse_error() {
        let mut parser = parser();
        parser.feed(b"1,2\n");
        assert!(matches!(
            parser.next_record(),
            Err(ConnectorError::Parse(_))
        ));
    }

    #[test]
    fn empty_lines_are_skipped() {
        let mut parser = parser();
        parser.feed(b"\n\n5,6,7\n");
        assert_eq!(
            parser.next_record().unwrap().unwrap(),
            Record::new(vec![VarVal::Int32(5), VarVal::Int32(6), VarVal::Int32(7)])
        );
    }
}
