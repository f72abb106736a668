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
use std::io::Read;
use std::net::TcpStream;
use std::time::Duration;

use rill_common::buffer::{BufferProvider, TupleBuffer};
use rill_common::catalog::{Schema, SourceDescriptor};
use rill_common::record::RecordBufferView;
use rill_common::util::StopToken;

use super::{require_config, Source, SourceFill};
use crate::error::{ConnectorError, Result};
use crate::parser::CsvTupleParser;

/// How long a blocking read may run before the stop token is re-checked.
const READ_SLICE: Duration = Duration::from_millis(50);

/// Reads delimited tuples from a TCP byte stream.
#[derive(Debug)]
pub struct TcpSource {
    host: String,
    port: u16,
    schema: Schema,
    parser: CsvTupleParser,
    stream: Option<TcpStream>,
    peer_closed: bool,
}

impl TcpSource {
    pub fn new(descriptor: &SourceDescriptor) -> Result<Self> {
        let host = require_config(&descriptor.config, "host")?.to_owned();
        let port = parse_port(require_config(&descriptor.config, "port")?)?;
        Ok(Self {
            host,
            port,
            schema: descriptor.logical_source.schema.clone(),
            parser: CsvTupleParser::new(
                descriptor.logical_source.schema.clone(),
                descriptor.parser_config.clone(),
            )?,
            stream: None,
            peer_closed: false,
        })
    }

    pub fn from_descriptor(descriptor: &SourceDescriptor) -> Result<Box<dyn Source>> {
        Ok(Box::new(Self::new(descriptor)?))
    }

    pub fn validate_and_format(
        config: BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>> {
        require_config(&config, "host")?;
        parse_port(require_config(&config, "port")?)?;
        Ok(config)
    }

    /// Moves complete tuples from the tokenizer into the buffer view.
    fn drain_parsed(
        &mut self,
        view: &RecordBufferView,
        provider: &dyn BufferProvider,
    ) -> Result<usize> {
        let mut tuples = 0;
        while view.number_of_tuples() < view.capacity() {
            match self.parser.next_record()? {
                Some(record) => {
                    view.append_record(&record, provider)?;
                    tuples += 1;
                }
                None => break,
            }
        }
        Ok(tuples)
    }
}

fn parse_port(raw: &str) -> Result<u16> {
    raw.parse()
        .map_err(|_| ConnectorError::InvalidConfigParameter {
            name: "port".into(),
            reason: format!("not a port number: {raw}"),
        })
}

impl Source for TcpSource {
    fn open(&mut self, _provider: &dyn BufferProvider) -> Result<()> {
        let address = format!("{}:{}", self.host, self.port);
        tracing::debug!(address, "connecting tcp source");
        let stream = TcpStream::connect(&address)?;
        stream.set_read_timeout(Some(READ_SLICE))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn fill_tuple_buffer(
        &mut self,
        buffer: &TupleBuffer,
        provider: &dyn BufferProvider,
        stop: &StopToken,
    ) -> Result<SourceFill> {
        let view = RecordBufferView::new(buffer.clone(), self.schema.clone())?;
        let mut tuples = self.drain_parsed(&view, provider)?;
        let mut chunk = [0u8; 4096];

        loop {
            if view.number_of_tuples() >= view.capacity() {
                break;
            }
            if self.peer_closed {
                if tuples == 0 {
                    return Ok(SourceFill::EndOfStream);
                }
                break;
            }
            if stop.is_stop_requested() {
                break;
            }
            let stream = self
                .stream
                .as_mut()
                .ok_or_else(|| ConnectorError::Parse("tcp source not opened".to_owned()))?;
            match stream.read(&mut chunk) {
                Ok(0) => self.peer_closed = true,
                Ok(n) => {
                    self.parser.feed(&chunk[..n]);
                    tuples += self.drain_parsed(&view, provider)?;
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    // Read slice elapsed; flush what we have or keep waiting.
                    if tuples > 0 {
                        break;
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(SourceFill::Data {
            bytes_written: tuples * self.schema.size_of_schema_in_bytes(),
        })
    }

    fn close(&mut self) -> Result<()> {
        self.stream = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::net::TcpListener;

    use rill_common::buffer::BufferManager;
    use rill_common::catalog::{Field, LogicalSource, ParserConfig};
    use rill_common::ids::{PhysicalSourceId, WorkerId};
    use rill_common::types::{DataType, VarVal};

    use super::*;

    fn descriptor(port: u16) -> SourceDescriptor {
        let schema = Schema::new(vec![
            Field::new("a", DataType::Int32),
            Field::new("b", DataType::Int32),
            Field::new("c", DataType::Int32),
        ])
        .unwrap();
        SourceDescriptor {
            physical_source_id: PhysicalSourceId::new(1),
            logical_source: LogicalSource::new("nums", schema),
            worker_id: WorkerId::new(1),
            source_type: "TCP".into(),
            buffers_in_local_pool: None,
            config: BTreeMap::from([
                ("host".to_owned(), "127.0.0.1".to_owned()),
                ("port".to_owned(), port.to_string()),
            ]),
            parser_config: ParserConfig::default(),
        }
    }

    /// Serves `payload` on a loopback port, once, then closes.
    fn spawn_one_shot_server(payload: &'static [u8]) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        std::thread::spawn(move || {
            if let Ok((mut socket, _)) = listener.accept() {
                socket.write_all(payload).unwrap();
            }
        });
        port
    }

    #[test]
    fn reads_tuples_until_peer_closes() {
        let port = spawn_one_shot_server(b"1,2,3\n2,3,4\n");
        let pool = BufferManager::new(256, 4).unwrap();
        let mut source = TcpSource::new(&descriptor(port)).unwrap();
        source.open(&pool).unwrap();

        let buffer = pool.get_buffer_no_blocking().unwrap();
        let fill = source
            .fill_tuple_buffer(&buffer, &pool, &StopToken::never())
            .unwrap();
        assert_eq!(fill, SourceFill::Data { bytes_written: 24 });

        let view = RecordBufferView::new(buffer.clone(), descriptor(port).logical_source.schema)
            .unwrap();
        assert_eq!(view.number_of_tuples(), 2);
        assert_eq!(view.read_value(1, 0).unwrap(), VarVal::Int32(2));

        let next = pool.get_buffer_no_blocking().unwrap();
        assert_eq!(
            source
                .fill_tuple_buffer(&next, &pool, &StopToken::never())
                .unwrap(),
            SourceFill::EndOfStream
        );
        source.close().unwrap();
    }

    #[test]
    fn cancelled_token_returns_promptly() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        // Keep the listener alive but never send anything.
        let _server = std::thread::spawn(move || listener.accept());

        let pool = BufferManager::new(256, 4).unwrap();
        let mut source = TcpSource::new(&descriptor(port)).unwrap();
        source.open(&pool).unwrap();

        let stop = rill_common::util::StopSource::new();
        stop.request_stop();

        let buffer = pool.get_buffer_no_blocking().unwrap();
        let started = std::time::Instant::now();
        let fill = source
            .fill_tuple_buffer(&buffer, &pool, &stop.token())
            .unwrap();
        assert_eq!(fill, SourceFill::Data { bytes_written: 0 });
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
