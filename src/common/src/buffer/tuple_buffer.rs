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

use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{CommonError, Result};
use crate::ids::{ChunkNumber, OriginId, SequenceNumber};

/// Where a buffer's memory came from, and where it goes on last release.
pub(super) enum Provenance {
    /// A segment of a pool slab; `recycler` gets the slot back.
    Pooled {
        recycler: Arc<dyn BufferRecycler>,
        slot: usize,
    },
    /// A one-shot heap allocation, freed on last release.
    Unpooled { layout: std::alloc::Layout },
}

/// Receives a pool slot back when the last handle to its buffer is dropped.
pub(super) trait BufferRecycler: Send + Sync {
    fn recycle(&self, slot: usize);
}

/// The per-buffer metadata carried alongside the data region.
#[derive(Default)]
struct BufferHeader {
    origin_id: AtomicU64,
    sequence_number: AtomicU64,
    chunk_number: AtomicU64,
    last_chunk: AtomicBool,
    watermark: AtomicU64,
    creation_timestamp_ms: AtomicU64,
    number_of_tuples: AtomicU64,
}

pub(super) struct BufferControl {
    data: NonNull<u8>,
    capacity: usize,
    header: BufferHeader,
    children: Mutex<Vec<TupleBuffer>>,
    provenance: Provenance,
}

// The data region is exclusively owned by this control block; handles uphold
// the single-writer discipline of the pipeline (a buffer is filled by exactly
// one thread before it is shared downstream).
unsafe impl Send for BufferControl {}
unsafe impl Sync for BufferControl {}

impl Drop for BufferControl {
    fn drop(&mut self) {
        // Children recycle recursively through their own handles.
        self.children.get_mut().clear();
        match &self.provenance {
            Provenance::Pooled { recycler, slot } => recycler.recycle(*slot),
            Provenance::Unpooled { layout } => unsafe {
                std::alloc::dealloc(self.data.as_ptr(), *layout);
            },
        }
    }
}

/// A reference-counted handle to one fixed-size memory region plus header
/// metadata and an ordered list of child buffers for variable-sized payloads.
///
/// Cloning a handle increments the reference count; the region returns to its
/// pool (or is freed, when unpooled) on the last release.
#[derive(Clone)]
pub struct TupleBuffer {
    ctrl: Arc<BufferControl>,
}

impl TupleBuffer {
    pub(super) fn pooled(
        data: NonNull<u8>,
        capacity: usize,
        recycler: Arc<dyn BufferRecycler>,
        slot: usize,
    ) -> Self {
        Self {
            ctrl: Arc::new(BufferControl {
                data,
                capacity,
                header: BufferHeader::default(),
                children: Mutex::new(vec![]),
                provenance: Provenance::Pooled { recycler, slot },
            }),
        }
    }

    pub(super) fn unpooled(size: usize) -> Result<Self> {
        let layout = std::alloc::Layout::from_size_align(size.max(1), 8)
            .map_err(|_| CommonError::CannotAllocateBuffer(size))?;
        let raw = unsafe { std::alloc::alloc_zeroed(layout) };
        let data = NonNull::new(raw).ok_or(CommonError::CannotAllocateBuffer(size))?;
        Ok(Self {
            ctrl: Arc::new(BufferControl {
                data,
                capacity: size,
                header: BufferHeader::default(),
                children: Mutex::new(vec![]),
                provenance: Provenance::Unpooled { layout },
            }),
        })
    }

    /// The size of the data region in bytes.
    pub fn capacity(&self) -> usize {
        self.ctrl.capacity
    }

    /// The number of outstanding handles to this buffer.
    pub fn reference_count(&self) -> usize {
        Arc::strong_count(&self.ctrl)
    }

    /// The whole data region.
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ctrl.data.as_ptr(), self.ctrl.capacity) }
    }

    /// Reads `len` bytes starting at `offset`.
    pub fn read_bytes(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.check_bounds(offset, len)?;
        Ok(unsafe { std::slice::from_raw_parts(self.ctrl.data.as_ptr().add(offset), len) })
    }

    /// Copies `src` into the region starting at `offset`.
    pub fn write_bytes(&self, offset: usize, src: &[u8]) -> Result<()> {
        self.check_bounds(offset, src.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                src.as_ptr(),
                self.ctrl.data.as_ptr().add(offset),
                src.len(),
            );
        }
        Ok(())
    }

    fn check_bounds(&self, offset: usize, len: usize) -> Result<()> {
        if offset.checked_add(len).map_or(true, |end| end > self.ctrl.capacity) {
            return Err(CommonError::BufferOutOfBounds {
                offset,
                len,
                buffer_size: self.ctrl.capacity,
            });
        }
        Ok(())
    }

    pub fn origin_id(&self) -> OriginId {
        OriginId::new(self.ctrl.header.origin_id.load(Ordering::Acquire))
    }

    pub fn set_origin_id(&self, origin: OriginId) {
        self.ctrl
            .header
            .origin_id
            .store(origin.raw(), Ordering::Release);
    }

    pub fn sequence_number(&self) -> SequenceNumber {
        SequenceNumber::new(self.ctrl.header.sequence_number.load(Ordering::Acquire))
    }

    pub fn set_sequence_number(&self, sequence: SequenceNumber) {
        self.ctrl
            .header
            .sequence_number
            .store(sequence.raw(), Ordering::Release);
    }

    pub fn chunk_number(&self) -> ChunkNumber {
        ChunkNumber::new(self.ctrl.header.chunk_number.load(Ordering::Acquire))
    }

    pub fn set_chunk_number(&self, chunk: ChunkNumber) {
        self.ctrl
            .header
            .chunk_number
            .store(chunk.raw(), Ordering::Release);
    }

    pub fn is_last_chunk(&self) -> bool {
        self.ctrl.header.last_chunk.load(Ordering::Acquire)
    }

    pub fn set_last_chunk(&self, last: bool) {
        self.ctrl.header.last_chunk.store(last, Ordering::Release);
    }

    pub fn watermark(&self) -> u64 {
        self.ctrl.header.watermark.load(Ordering::Acquire)
    }

    pub fn set_watermark(&self, watermark: u64) {
        self.ctrl
            .header
            .watermark
            .store(watermark, Ordering::Release);
    }

    pub fn creation_timestamp_ms(&self) -> u64 {
        self.ctrl
            .header
            .creation_timestamp_ms
            .load(Ordering::Acquire)
    }

    pub fn set_creation_timestamp_ms(&self, ts: u64) {
        self.ctrl
            .header
            .creation_timestamp_ms
            .store(ts, Ordering::Release);
    }

    /// For child buffers this field records bytes used instead.
    pub fn number_of_tuples(&self) -> u64 {
        self.ctrl.header.number_of_tuples.load(Ordering::Acquire)
    }

    pub fn set_number_of_tuples(&self, n: u64) {
        self.ctrl
            .header
            .number_of_tuples
            .store(n, Ordering::Release);
    }

    /// Appends `child` to the child buffer list and returns its index.
    pub fn store_child_buffer(&self, child: TupleBuffer) -> u32 {
        let mut children = self.ctrl.children.lock();
        children.push(child);
        (children.len() - 1) as u32
    }

    /// Returns a strong reference to the child buffer at `index`.
    pub fn load_child_buffer(&self, index: u32) -> Result<TupleBuffer> {
        let children = self.ctrl.children.lock();
        children
            .get(index as usize)
            .cloned()
            .ok_or(CommonError::ChildBufferNotFound {
                index,
                count: children.len() as u32,
            })
    }

    pub fn number_of_child_buffers(&self) -> u32 {
        self.ctrl.children.lock().len() as u32
    }
}

impl std::fmt::Debug for TupleBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TupleBuffer")
            .field("capacity", &self.capacity())
            .field("origin_id", &self.origin_id())
            .field("sequence_number", &self.sequence_number())
            .field("number_of_tuples", &self.number_of_tuples())
            .field("children", &self.number_of_child_buffers())
            .finish()
    }
}
