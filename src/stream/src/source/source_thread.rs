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

//! The owning thread of one source.
//!
//! The thread pulls buffers from a source-local sub-pool, lets the plugin
//! fill them, labels every non-empty buffer with origin, a contiguous
//! sequence number and a creation timestamp, and hands it to the registered
//! emit function. Stopping is cooperative through a stop token and bounded
//! by per-state deadlines.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rill_common::buffer::{BufferManager, BufferProvider};
use rill_common::ids::{ChunkNumber, OriginId, SequenceNumber};
use rill_common::util::{current_time_millis, StopSource};
use rill_connector::source::{Source, SourceFill};

use crate::error::{Result, StreamError};

/// Deadline for a stop when the thread never ran.
const STOP_TIMEOUT_NOT_RUNNING: Duration = Duration::from_secs(1);
/// Deadline for a stop while the running routine is live.
const STOP_TIMEOUT_RUNNING: Duration = Duration::from_secs(10);

/// What a source reports to its consumer.
#[derive(Debug)]
pub enum SourceEvent {
    /// A labeled, non-empty tuple buffer.
    Data(rill_common::buffer::TupleBuffer),
    /// The plugin signalled end of stream; `Stopped` follows after close.
    EndOfStream,
    /// The running routine failed; the thread exits without `Stopped`.
    Error(StreamError),
    /// The source has closed and released its resources.
    Stopped,
}

pub type EmitFn = Arc<dyn Fn(OriginId, SourceEvent) + Send + Sync>;

/// One source plus the thread that owns it.
pub struct SourceThread {
    origin_id: OriginId,
    num_local_buffers: usize,
    buffer_manager: BufferManager,
    emit: EmitFn,
    implementation: Mutex<Option<Box<dyn Source>>>,
    running: AtomicBool,
    was_started: AtomicBool,
    stop_source: StopSource,
    max_sequence_number: AtomicU64,
    completion: Mutex<Option<mpsc::Receiver<Result<()>>>>,
    handle: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl SourceThread {
    pub fn new(
        origin_id: OriginId,
        buffer_manager: BufferManager,
        num_local_buffers: usize,
        implementation: Box<dyn Source>,
        emit: EmitFn,
    ) -> Self {
        debug_assert!(origin_id.is_valid(), "source origin id must be set");
        Self {
            origin_id,
            num_local_buffers,
            buffer_manager,
            emit,
            implementation: Mutex::new(Some(implementation)),
            running: AtomicBool::new(false),
            was_started: AtomicBool::new(false),
            stop_source: StopSource::new(),
            max_sequence_number: AtomicU64::new(0),
            completion: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    pub fn origin_id(&self) -> OriginId {
        self.origin_id
    }

    /// Spawns the owning thread. Returns `false` when the source is already
    /// running.
    pub fn start(self: &Arc<Self>) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!(origin = %self.origin_id, "source is already running");
            return false;
        }
        if self
            .was_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let (sender, receiver) = mpsc::channel();
            *self.completion.lock() = Some(receiver);
            let this = Arc::clone(self);
            let handle = std::thread::Builder::new()
                .name(format!("rill-src-{}", self.origin_id))
                .spawn(move || this.running_routine(sender))
                .expect("failed to spawn source thread");
            *self.handle.lock() = Some(handle);
        }
        true
    }

    /// Stops the source, waiting up to a per-state deadline for the thread
    /// to complete.
    pub fn stop(&self) -> Result<()> {
        let was_running = self.running.swap(false, Ordering::AcqRel);
        self.stop_source.request_stop();
        tracing::debug!(origin = %self.origin_id, was_running, "stopping source");

        if !self.was_started.load(Ordering::Acquire) {
            // The thread never existed, so nobody else can report this.
            (self.emit)(
                self.origin_id,
                SourceEvent::Error(StreamError::StopBeforeStartFailure(self.origin_id)),
            );
            return Ok(());
        }

        let Some(receiver) = self.completion.lock().take() else {
            // A previous stop already retrieved the completion.
            return Ok(());
        };
        let timeout = if was_running {
            STOP_TIMEOUT_RUNNING
        } else {
            STOP_TIMEOUT_NOT_RUNNING
        };
        let completion = receiver
            .recv_timeout(timeout)
            .map_err(|_| StreamError::SourceStopTimeout {
                origin: self.origin_id,
                timeout_ms: timeout.as_millis() as u64,
            })?;
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
        completion
    }

    fn running_routine(&self, completion: mpsc::Sender<Result<()>>) {
        tracing::debug!(origin = %self.origin_id, "source thread started");
        match self.run_loop() {
            Ok(()) => {
                let _ = completion.send(Ok(()));
                tracing::debug!(origin = %self.origin_id, "source thread finished");
            }
            Err(e) => {
                let failure = StreamError::RunningRoutineFailure {
                    origin: self.origin_id,
                    reason: e.to_string(),
                };
                (self.emit)(self.origin_id, SourceEvent::Error(failure.clone()));
                let _ = completion.send(Err(failure));
            }
        }
    }

    fn run_loop(&self) -> Result<()> {
        let local_pool = self
            .buffer_manager
            .create_fixed_size_pool(self.num_local_buffers)?;
        let mut source = self
            .implementation
            .lock()
            .take()
            .ok_or(StreamError::CannotProduceSourceBuffer(self.origin_id))?;
        source.open(&local_pool)?;

        let token = self.stop_source.token();
        while self.running.load(Ordering::Acquire) {
            let Some(buffer) = local_pool.get_buffer_blocking(&token) else {
                break; // cancelled while waiting for a buffer
            };
            match source.fill_tuple_buffer(&buffer, &local_pool, &token)? {
                SourceFill::Data { bytes_written } => {
                    if buffer.number_of_tuples() > 0 {
                        self.label_and_emit(buffer, bytes_written);
                    }
                }
                SourceFill::EndOfStream => {
                    tracing::debug!(origin = %self.origin_id, "source reached end of stream");
                    (self.emit)(self.origin_id, SourceEvent::EndOfStream);
                    self.running.store(false, Ordering::Release);
                }
            }
        }

        source.close()?;
        (self.emit)(self.origin_id, SourceEvent::Stopped);
        Ok(())
    }

    fn label_and_emit(&self, buffer: rill_common::buffer::TupleBuffer, bytes_written: usize) {
        let sequence = self.max_sequence_number.fetch_add(1, Ordering::Relaxed) + 1;
        buffer.set_origin_id(self.origin_id);
        buffer.set_sequence_number(SequenceNumber::new(sequence));
        buffer.set_chunk_number(ChunkNumber::new(1));
        buffer.set_last_chunk(true);
        buffer.set_creation_timestamp_ms(current_time_millis());
        tracing::trace!(
            origin = %self.origin_id,
            sequence,
            tuples = buffer.number_of_tuples(),
            bytes_written,
            "emitting source buffer"
        );
        (self.emit)(self.origin_id, SourceEvent::Data(buffer));
    }
}

#[cfg(test)]
mod tests {
    use rill_common::buffer::TupleBuffer;
    use rill_common::catalog::{Field, Schema};
    use rill_common::record::{Record, RecordBufferView};
    use rill_common::types::{DataType, VarVal};
    use rill_common::util::StopToken;

    use super::*;

    /// Produces `remaining` single-record buffers, then EoS.
    #[derive(Debug)]
    struct CountingSource {
        schema: Schema,
        remaining: usize,
    }

    impl CountingSource {
        fn new(remaining: usize) -> Self {
            Self {
                schema: Schema::new(vec![Field::new("n", DataType::UInt64)]).unwrap(),
                remaining,
            }
        }
    }

    impl Source for CountingSource {
        fn open(&mut self, _provider: &dyn BufferProvider) -> rill_connector::Result<()> {
            Ok(())
        }

        fn fill_tuple_buffer(
            &mut self,
            buffer: &TupleBuffer,
            provider: &dyn BufferProvider,
            _stop: &StopToken,
        ) -> rill_connector::Result<SourceFill> {
            if self.remaining == 0 {
                return Ok(SourceFill::EndOfStream);
            }
            self.remaining -= 1;
            let view = RecordBufferView::new(buffer.clone(), self.schema.clone())?;
            view.append_record(
                &Record::new(vec![VarVal::UInt64(self.remaining as u64)]),
                provider,
            )?;
            Ok(SourceFill::Data { bytes_written: 8 })
        }

        fn close(&mut self) -> rill_connector::Result<()> {
            Ok(())
        }
    }

    /// Blocks until cancelled, never producing data.
    #[derive(Debug)]
    struct BlockingSource;

    impl Source for BlockingSource {
        fn open(&mut self, _provider: &dyn BufferProvider) -> rill_connector::Result<()> {
            Ok(())
        }

        fn fill_tuple_buffer(
            &mut self,
            _buffer: &TupleBuffer,
            _provider: &dyn BufferProvider,
            stop: &StopToken,
        ) -> rill_connector::Result<SourceFill> {
            while !stop.is_stop_requested() {
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(SourceFill::Data { bytes_written: 0 })
        }

        fn close(&mut self) -> rill_connector::Result<()> {
            Ok(())
        }
    }

    fn collecting_emit() -> (EmitFn, Arc<Mutex<Vec<(OriginId, String)>>>) {
        let events: Arc<Mutex<Vec<(OriginId, String)>>> = Arc::new(Mutex::new(vec![]));
        let sink = Arc::clone(&events);
        let emit: EmitFn = Arc::new(move |origin, event| {
            let tag = match &event {
                SourceEvent::Data(buffer) => format!("data:{}", buffer.sequence_number()),
                SourceEvent::EndOfStream => "eos".to_owned(),
                SourceEvent::Error(e) => format!("error:{e}"),
                SourceEvent::Stopped => "stopped".to_owned(),
            };
            sink.lock().push((origin, tag));
        });
        (emit, events)
    }

    /// Waits until the routine has reported `tag`, so stop() only retrieves
    /// the completion instead of racing production.
    fn wait_for_tag(events: &Arc<Mutex<Vec<(OriginId, String)>>>, tag: &str) {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while std::time::Instant::now() < deadline {
            if events.lock().iter().any(|(_, t)| t == tag) {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("timed out waiting for {tag}");
    }

    #[test]
    fn sequence_numbers_are_contiguous_from_one() {
        let pool = BufferManager::new(128, 8).unwrap();
        let (emit, events) = collecting_emit();
        let origin = OriginId::new(42);
        let source = Arc::new(SourceThread::new(
            origin,
            pool,
            4,
            Box::new(CountingSource::new(3)),
            emit,
        ));
        assert!(source.start());
        wait_for_tag(&events, "stopped");
        source.stop().unwrap();

        let events = events.lock();
        let tags: Vec<&str> = events.iter().map(|(_, tag)| tag.as_str()).collect();
        assert_eq!(tags, vec!["data:1", "data:2", "data:3", "eos", "stopped"]);
        assert!(events.iter().all(|(o, _)| *o == origin));
    }

    #[test]
    fn eos_on_first_call_stops_without_data() {
        let pool = BufferManager::new(128, 8).unwrap();
        let (emit, events) = collecting_emit();
        let source = Arc::new(SourceThread::new(
            OriginId::new(1),
            pool,
            2,
            Box::new(CountingSource::new(0)),
            emit,
        ));
        assert!(source.start());
        wait_for_tag(&events, "stopped");
        source.stop().unwrap();

        let tags: Vec<String> = events.lock().iter().map(|(_, tag)| tag.clone()).collect();
        assert_eq!(tags, vec!["eos", "stopped"]);
    }

    #[test]
    fn stop_before_start_reports_from_the_calling_thread() {
        let pool = BufferManager::new(128, 8).unwrap();
        let (emit, events) = collecting_emit();
        let source = Arc::new(SourceThread::new(
            OriginId::new(5),
            pool,
            2,
            Box::new(CountingSource::new(1)),
            emit,
        ));
        source.stop().unwrap();

        let tags: Vec<String> = events.lock().iter().map(|(_, tag)| tag.clone()).collect();
        assert_eq!(tags.len(), 1);
        assert!(tags[0].contains("stopped before it ever started"), "{tags:?}");
    }

    #[test]
    fn stop_cancels_a_blocked_source() {
        let pool = BufferManager::new(128, 8).unwrap();
        let (emit, events) = collecting_emit();
        let source = Arc::new(SourceThread::new(
            OriginId::new(9),
            pool,
            2,
            Box::new(BlockingSource),
            emit,
        ));
        assert!(source.start());
        std::thread::sleep(Duration::from_millis(50));
        source.stop().unwrap();

        let tags: Vec<String> = events.lock().iter().map(|(_, tag)| tag.clone()).collect();
        assert_eq!(tags, vec!["stopped"]);
    }

    #[test]
    fn double_start_is_refused() {
        let pool = BufferManager::new(128, 8).unwrap();
        let (emit, _events) = collecting_emit();
        let source = Arc::new(SourceThread::new(
            OriginId::new(2),
            pool,
            2,
            Box::new(BlockingSource),
            emit,
        ));
        assert!(source.start());
        assert!(!source.start());
        source.stop().unwrap();
    }
}
