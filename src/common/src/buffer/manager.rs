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
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::tuple_buffer::{BufferRecycler, TupleBuffer};
use crate::error::{CommonError, Result};
use crate::util::StopToken;

/// Granularity at which blocked acquisitions re-check their stop token.
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Hands out tuple buffers. Implemented by the global pool and by
/// source-local sub-pools.
pub trait BufferProvider: Send + Sync {
    /// The size of one pooled buffer.
    fn buffer_size(&self) -> usize;

    /// Waits until a pooled buffer is free. Returns `None` only when the
    /// stop token is cancelled.
    fn get_buffer_blocking(&self, stop: &StopToken) -> Option<TupleBuffer>;

    /// Returns a pooled buffer if one is free right now.
    fn get_buffer_no_blocking(&self) -> Option<TupleBuffer>;

    /// A one-shot heap allocation for payloads exceeding the pool buffer
    /// size.
    fn get_unpooled_buffer(&self, size: usize) -> Result<TupleBuffer>;
}

struct GlobalPoolInner {
    buffer_size: usize,
    num_buffers: usize,
    slab: NonNull<u8>,
    slab_layout: std::alloc::Layout,
    free: Mutex<Vec<usize>>,
    available: Condvar,
}

unsafe impl Send for GlobalPoolInner {}
unsafe impl Sync for GlobalPoolInner {}

impl Drop for GlobalPoolInner {
    fn drop(&mut self) {
        // Outstanding handles keep this inner alive through their recyclers,
        // so the slab is only freed once every buffer has been released.
        unsafe { std::alloc::dealloc(self.slab.as_ptr(), self.slab_layout) };
    }
}

impl GlobalPoolInner {
    fn segment_ptr(&self, slot: usize) -> NonNull<u8> {
        debug_assert!(slot < self.num_buffers);
        unsafe { NonNull::new_unchecked(self.slab.as_ptr().add(slot * self.buffer_size)) }
    }
}

impl BufferRecycler for GlobalPoolInner {
    fn recycle(&self, slot: usize) {
        self.free.lock().push(slot);
        self.available.notify_one();
    }
}

/// The global buffer pool: a fixed number of fixed-size segments configured
/// at startup, with a lock-protected free list and condition-variable
/// signalling.
#[derive(Clone)]
pub struct BufferManager {
    inner: Arc<GlobalPoolInner>,
}

impl BufferManager {
    pub fn new(buffer_size: usize, num_buffers: usize) -> Result<Self> {
        if buffer_size == 0 || num_buffers == 0 {
            return Err(CommonError::InvalidConfigParameter {
                name: "buffer pool".into(),
                reason: format!("{num_buffers} buffers of {buffer_size} bytes"),
            });
        }
        let slab_layout = std::alloc::Layout::from_size_align(buffer_size * num_buffers, 8)
            .map_err(|_| CommonError::CannotAllocateBuffer(buffer_size * num_buffers))?;
        let raw = unsafe { std::alloc::alloc_zeroed(slab_layout) };
        let slab =
            NonNull::new(raw).ok_or(CommonError::CannotAllocateBuffer(buffer_size * num_buffers))?;
        tracing::debug!(buffer_size, num_buffers, "created buffer pool");
        Ok(Self {
            inner: Arc::new(GlobalPoolInner {
                buffer_size,
                num_buffers,
                slab,
                slab_layout,
                free: Mutex::new((0..num_buffers).collect()),
                available: Condvar::new(),
            }),
        })
    }

    pub fn num_buffers(&self) -> usize {
        self.inner.num_buffers
    }

    pub fn num_free_buffers(&self) -> usize {
        self.inner.free.lock().len()
    }

    /// Carves a fixed-size sub-pool out of the global pool, e.g. for a
    /// source thread. The reserved segments return to the global pool when
    /// the sub-pool is dropped.
    pub fn create_fixed_size_pool(&self, num_buffers: usize) -> Result<LocalBufferPool> {
        let mut free = self.inner.free.lock();
        if free.len() < num_buffers {
            return Err(CommonError::CannotAllocateBuffer(
                num_buffers * self.inner.buffer_size,
            ));
        }
        let split_at = free.len() - num_buffers;
        let reserved = free.split_off(split_at);
        Ok(LocalBufferPool {
            inner: Arc::new(LocalPoolInner {
                global: Arc::clone(&self.inner),
                free: Mutex::new(reserved),
                available: Condvar::new(),
                detached: AtomicBool::new(false),
            }),
        })
    }

    fn make_buffer(&self, slot: usize) -> TupleBuffer {
        TupleBuffer::pooled(
            self.inner.segment_ptr(slot),
            self.inner.buffer_size,
            Arc::clone(&self.inner) as Arc<dyn BufferRecycler>,
            slot,
        )
    }
}

impl BufferProvider for BufferManager {
    fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    fn get_buffer_blocking(&self, stop: &StopToken) -> Option<TupleBuffer> {
        let mut free = self.inner.free.lock();
        loop {
            if let Some(slot) = free.pop() {
                drop(free);
                return Some(self.make_buffer(slot));
            }
            if stop.is_stop_requested() {
                return None;
            }
            self.inner.available.wait_for(&mut free, WAIT_SLICE);
        }
    }

    fn get_buffer_no_blocking(&self) -> Option<TupleBuffer> {
        let slot = self.inner.free.lock().pop()?;
        Some(self.make_buffer(slot))
    }

    fn get_unpooled_buffer(&self, size: usize) -> Result<TupleBuffer> {
        TupleBuffer::unpooled(size)
    }
}

struct LocalPoolInner {
    global: Arc<GlobalPoolInner>,
    free: Mutex<Vec<usize>>,
    available: Condvar,
    detached: AtomicBool,
}

impl BufferRecycler for LocalPoolInner {
    fn recycle(&self, slot: usize) {
        if self.detached.load(Ordering::Acquire) {
            self.global.recycle(slot);
        } else {
            self.free.lock().push(slot);
            self.available.notify_one();
        }
    }
}

/// A source-local sub-pool holding a fixed number of segments reserved from
/// the global pool.
pub struct LocalBufferPool {
    inner: Arc<LocalPoolInner>,
}

impl LocalBufferPool {
    pub fn num_free_buffers(&self) -> usize {
        self.inner.free.lock().len()
    }

    fn make_buffer(&self, slot: usize) -> TupleBuffer {
        TupleBuffer::pooled(
            self.inner.global.segment_ptr(slot),
            self.inner.global.buffer_size,
            Arc::clone(&self.inner) as Arc<dyn BufferRecycler>,
            slot,
        )
    }
}

impl Drop for LocalBufferPool {
    fn drop(&mut self) {
        self.inner.detached.store(true, Ordering::Release);
        for slot in self.inner.free.lock().drain(..) {
            self.inner.global.recycle(slot);
        }
    }
}

impl BufferProvider for LocalBufferPool {
    fn buffer_size(&self) -> usize {
        self.inner.global.buffer_size
    }

    fn get_buffer_blocking(&self, stop: &StopToken) -> Option<TupleBuffer> {
        let mut free = self.inner.free.lock();
        loop {
            if let Some(slot) = free.pop() {
                drop(free);
                return Some(self.make_buffer(slot));
            }
            if stop.is_stop_requested() {
                return None;
            }
            self.inner.available.wait_for(&mut free, WAIT_SLICE);
        }
    }

    fn get_buffer_no_blocking(&self) -> Option<TupleBuffer> {
        let slot = self.inner.free.lock().pop()?;
        Some(self.make_buffer(slot))
    }

    fn get_unpooled_buffer(&self, size: usize) -> Result<TupleBuffer> {
        TupleBuffer::unpooled(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::StopSource;

    #[test]
    fn pool_hands_out_and_reclaims_buffers() {
        let pool = BufferManager::new(128, 4).unwrap();
        assert_eq!(pool.num_free_buffers(), 4);

        let buffers: Vec<_> = (0..4)
            .map(|_| pool.get_buffer_no_blocking().unwrap())
            .collect();
        assert_eq!(pool.num_free_buffers(), 0);
        assert!(pool.get_buffer_no_blocking().is_none());

        drop(buffers);
        assert_eq!(pool.num_free_buffers(), 4);
    }

    #[test]
    fn blocking_acquisition_wakes_on_release() {
        let pool = BufferManager::new(64, 1).unwrap();
        let held = pool.get_buffer_no_blocking().unwrap();

        let pool2 = pool.clone();
        let waiter = std::thread::spawn(move || {
            pool2
                .get_buffer_blocking(&StopToken::never())
                .map(|b| b.capacity())
        });

        std::thread::sleep(Duration::from_millis(100));
        drop(held);
        assert_eq!(waiter.join().unwrap(), Some(64));
    }

    #[test]
    fn blocking_acquisition_is_cancellable() {
        let pool = BufferManager::new(64, 1).unwrap();
        let _held = pool.get_buffer_no_blocking().unwrap();

        let source = StopSource::new();
        let token = source.token();
        let pool2 = pool.clone();
        let waiter = std::thread::spawn(move || pool2.get_buffer_blocking(&token));

        std::thread::sleep(Duration::from_millis(50));
        source.request_stop();
        assert!(waiter.join().unwrap().is_none());
    }

    #[test]
    fn local_pool_reserves_and_returns_segments() {
        let pool = BufferManager::new(64, 8).unwrap();
        {
            let local = pool.create_fixed_size_pool(3).unwrap();
            assert_eq!(pool.num_free_buffers(), 5);
            assert_eq!(local.num_free_buffers(), 3);

            let held = local.get_buffer_no_blocking().unwrap();
            assert_eq!(local.num_free_buffers(), 2);
            drop(held);
            assert_eq!(local.num_free_buffers(), 3);
        }
        assert_eq!(pool.num_free_buffers(), 8);
    }

    #[test]
    fn outstanding_local_buffer_returns_to_global_after_pool_drop() {
        let pool = BufferManager::new(64, 2).unwrap();
        let local = pool.create_fixed_size_pool(1).unwrap();
        let held = local.get_buffer_no_blocking().unwrap();
        drop(local);
        assert_eq!(pool.num_free_buffers(), 1);
        drop(held);
        assert_eq!(pool.num_free_buffers(), 2);
    }

    #[test]
    fn insufficient_free_buffers_fail_sub_pool_creation() {
        let pool = BufferManager::new(64, 2).unwrap();
        let _held: Vec<_> = (0..2)
            .map(|_| pool.get_buffer_no_blocking().unwrap())
            .collect();
        assert!(matches!(
            pool.create_fixed_size_pool(1),
            Err(CommonError::CannotAllocateBuffer(_))
        ));
    }

    #[test]
    fn stress_concurrent_acquire_release() {
        use rand::Rng;

        let pool = BufferManager::new(32, 8).unwrap();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    let mut rng = rand::thread_rng();
                    for _ in 0..200 {
                        let buffer = pool.get_buffer_blocking(&StopToken::never()).unwrap();
                        buffer.write_bytes(0, &[1, 2, 3, 4]).unwrap();
                        if rng.gen_bool(0.1) {
                            std::thread::sleep(Duration::from_micros(50));
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(pool.num_free_buffers(), 8);
    }
}
