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

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use rill_common::buffer::TupleBuffer;
use rill_common::catalog::Schema;
use rill_common::record::{Record, RecordBufferView};

use super::Sink;
use crate::error::Result;

type ResultStore = Mutex<HashMap<String, Arc<Mutex<Vec<Record>>>>>;

static RESULTS: LazyLock<ResultStore> = LazyLock::new(|| Mutex::new(HashMap::new()));

/// The records collected so far under `sink_name`. Tests read and drain this
/// handle while the query runs.
pub fn collected_results(sink_name: &str) -> Arc<Mutex<Vec<Record>>> {
    Arc::clone(
        RESULTS
            .lock()
            .entry(sink_name.to_owned())
            .or_default(),
    )
}

/// Materializes every consumed record into a process-wide store, keyed by
/// sink name. The in-memory counterpart of a real sink, for tests and demos.
#[derive(Debug)]
pub struct CollectSink {
    schema: Schema,
    results: Arc<Mutex<Vec<Record>>>,
}

impl CollectSink {
    pub fn new(name: &str, schema: Schema) -> Self {
        Self {
            schema,
            results: collected_results(name),
        }
    }

    pub fn from_config(
        name: &str,
        schema: &Schema,
        _config: &BTreeMap<String, String>,
    ) -> Result<Box<dyn Sink>> {
        Ok(Box::new(Self::new(name, schema.clone())))
    }
}

impl Sink for CollectSink {
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn consume(&mut self, buffer: &TupleBuffer) -> Result<()> {
        let view = RecordBufferView::new(buffer.clone(), self.schema.clone())?;
        let mut results = self.results.lock();
        for index in 0..view.number_of_tuples() {
            results.push(view.read_record(index)?);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rill_common::buffer::{BufferManager, BufferProvider};
    use rill_common::catalog::Field;
    use rill_common::types::{DataType, VarVal};

    use super::*;

    #[test]
    fn consumed_records_land_in_the_store() {
        let schema = Schema::new(vec![Field::new("x", DataType::Int64)]).unwrap();
        let pool = BufferManager::new(128, 2).unwrap();
        let buffer = pool.get_buffer_no_blocking().unwrap();
        let view = RecordBufferView::new(buffer.clone(), schema.clone()).unwrap();
        view.append_record(&Record::new(vec![VarVal::Int64(11)]), &pool)
            .unwrap();
        view.append_record(&Record::new(vec![VarVal::Int64(22)]), &pool)
            .unwrap();

        let mut sink = CollectSink::new("collect-test", schema);
        sink.open().unwrap();
        sink.consume(&buffer).unwrap();
        sink.close().unwrap();

        let results = collected_results("collect-test");
        let collected = results.lock();
        assert_eq!(collected.len(), 2);
        assert_eq!(collected[1], Record::new(vec![VarVal::Int64(22)]));
    }
}
