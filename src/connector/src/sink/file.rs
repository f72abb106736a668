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
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use byteorder::{LittleEndian, WriteBytesExt};
use rill_common::buffer::TupleBuffer;
use rill_common::catalog::Schema;

use super::Sink;
use crate::error::{ConnectorError, Result};
use crate::wire::encode_buffer;

/// Appends wire-encoded buffers to a file, each one preceded by its encoded
/// length as a `u32` so readers can re-frame the stream.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    schema: Schema,
    writer: Option<BufWriter<File>>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>, schema: Schema) -> Self {
        Self {
            path: path.into(),
            schema,
            writer: None,
        }
    }

    pub fn from_config(
        _name: &str,
        schema: &Schema,
        config: &BTreeMap<String, String>,
    ) -> Result<Box<dyn Sink>> {
        let path = config
            .get("path")
            .ok_or_else(|| ConnectorError::InvalidConfigParameter {
                name: "path".into(),
                reason: "missing".into(),
            })?;
        Ok(Box::new(Self::new(path, schema.clone())))
    }
}

impl Sink for FileSink {
    fn open(&mut self) -> Result<()> {
        self.writer = Some(BufWriter::new(File::create(&self.path)?));
        Ok(())
    }

    fn consume(&mut self, buffer: &TupleBuffer) -> Result<()> {
        let encoded = encode_buffer(buffer, &self.schema)?;
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| ConnectorError::Parse("file sink not opened".to_owned()))?;
        writer.write_u32::<LittleEndian>(encoded.len() as u32)?;
        writer.write_all(&encoded)?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use byteorder::ReadBytesExt;
    use rill_common::buffer::{BufferManager, BufferProvider};
    use rill_common::catalog::Field;
    use rill_common::record::{Record, RecordBufferView};
    use rill_common::types::{DataType, VarVal};

    use super::*;
    use crate::wire::decode_buffer;

    #[test]
    fn framed_buffers_round_trip_through_a_file() {
        let schema = Schema::new(vec![Field::new("x", DataType::Int32)]).unwrap();
        let pool = BufferManager::new(64, 2).unwrap();
        let buffer = pool.get_buffer_no_blocking().unwrap();
        let view = RecordBufferView::new(buffer.clone(), schema.clone()).unwrap();
        view.append_record(&Record::new(vec![VarVal::Int32(5)]), &pool)
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let mut sink = FileSink::new(&path, schema.clone());
        sink.open().unwrap();
        sink.consume(&buffer).unwrap();
        sink.close().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let mut cursor = std::io::Cursor::new(bytes.as_slice());
        let frame_len = cursor.read_u32::<LittleEndian>().unwrap() as usize;
        let frame = &bytes[4..4 + frame_len];
        let (header, records) = decode_buffer(frame, &schema).unwrap();
        assert_eq!(header.number_of_tuples, 1);
        assert_eq!(records[0], Record::new(vec![VarVal::Int32(5)]));
    }
}
