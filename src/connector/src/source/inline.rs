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

use std::collections::BTreeMap;

use rill_common::buffer::{BufferProvider, TupleBuffer};
use rill_common::catalog::{Schema, SourceDescriptor};
use rill_common::record::RecordBufferView;
use rill_common::util::StopToken;

use super::{require_config, Source, SourceFill};
use crate::error::Result;
use crate::parser::CsvTupleParser;

/// Serves a fixed payload configured inline, then ends the stream. Used in
/// tests and demos where a real transport would only add noise.
#[derive(Debug)]
pub struct InlineSource {
    schema: Schema,
    parser: CsvTupleParser,
    payload: Option<Vec<u8>>,
}

impl InlineSource {
    pub fn new(descriptor: &SourceDescriptor) -> Result<Self> {
        let payload = require_config(&descriptor.config, "payload")?.as_bytes().to_vec();
        Ok(Self {
            schema: descriptor.logical_source.schema.clone(),
            parser: CsvTupleParser::new(
                descriptor.logical_source.schema.clone(),
                descriptor.parser_config.clone(),
            )?,
            payload: Some(payload),
        })
    }

    pub fn from_descriptor(descriptor: &SourceDescriptor) -> Result<Box<dyn Source>> {
        Ok(Box::new(Self::new(descriptor)?))
    }

    pub fn validate_and_format(
        config: BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>> {
        require_config(&config, "payload")?;
        Ok(config)
    }
}

impl Source for InlineSource {
    fn open(&mut self, _provider: &dyn BufferProvider) -> Result<()> {
        Ok(())
    }

    fn fill_tuple_buffer(
        &mut self,
        buffer: &TupleBuffer,
        provider: &dyn BufferProvider,
        _stop: &StopToken,
    ) -> Result<SourceFill> {
        if let Some(payload) = self.payload.take() {
            self.parser.feed(&payload);
        }
        let view = RecordBufferView::new(buffer.clone(), self.schema.clone())?;
        let mut tuples = 0usize;
        while view.number_of_tuples() < view.capacity() {
            match self.parser.next_record()? {
                Some(record) => {
                    view.append_record(&record, provider)?;
                    tuples += 1;
                }
                None => break,
            }
        }
        if tuples == 0 {
            return Ok(SourceFill::EndOfStream);
        }
        Ok(SourceFill::Data {
            bytes_written: tuples * self.schema.size_of_schema_in_bytes(),
        })
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rill_common::buffer::BufferManager;
    use rill_common::catalog::{Field, LogicalSource, ParserConfig};
    use rill_common::ids::{PhysicalSourceId, WorkerId};
    use rill_common::types::DataType;

    use super::*;

    fn descriptor(payload: &str) -> SourceDescriptor {
        let schema = Schema::new(vec![
            Field::new("a", DataType::Int32),
            Field::new("b", DataType::Int32),
        ])
        .unwrap();
        SourceDescriptor {
            physical_source_id: PhysicalSourceId::new(1),
            logical_source: LogicalSource::new("nums", schema),
            worker_id: WorkerId::new(1),
            source_type: "Inline".into(),
            buffers_in_local_pool: None,
            config: BTreeMap::from([("payload".to_owned(), payload.to_owned())]),
            parser_config: ParserConfig::default(),
        }
    }

    #[test]
    fn serves_payload_then_ends() {
        let pool = BufferManager::new(256, 4).unwrap();
        let mut source = InlineSource::new(&descriptor("1,2\n3,4\n")).unwrap();
        source.open(&pool).unwrap();

        let buffer = pool.get_buffer_no_blocking().unwrap();
        let fill = source
            .fill_tuple_buffer(&buffer, &pool, &StopToken::never())
            .unwrap();
        assert_eq!(fill, SourceFill::Data { bytes_written: 16 });
        assert_eq!(buffer.number_of_tuples(), 2);

        let next = pool.get_buffer_no_blocking().unwrap();
        assert_eq!(
            source
                .fill_tuple_buffer(&next, &pool, &StopToken::never())
                .unwrap(),
            SourceFill::EndOfStream
        );
    }
}
