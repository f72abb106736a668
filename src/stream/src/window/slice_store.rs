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
use std::sync::Arc;

use parking_lot::Mutex;

/// State bounded to one `[start, end)` time interval.
pub trait WindowSlice: Send + Sync {
    fn start(&self) -> u64;
    fn end(&self) -> u64;
}

struct SliceEntry<S> {
    slice: Arc<S>,
    emitted: bool,
}

/// An ordered store of non-overlapping slices, keyed by slice start.
///
/// One internal mutex covers creation and emission marking, so a slice is
/// extracted for triggering exactly once even when multiple worker threads
/// observe the same watermark advance.
pub struct SliceStore<S> {
    slice_width_ms: u64,
    slices: Mutex<BTreeMap<u64, SliceEntry<S>>>,
}

impl<S: WindowSlice> SliceStore<S> {
    pub fn new(slice_width_ms: u64) -> Self {
        debug_assert!(slice_width_ms > 0);
        Self {
            slice_width_ms,
            slices: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn slice_width_ms(&self) -> u64 {
        self.slice_width_ms
    }

    /// The bounds of the slice covering `ts`.
    pub fn slice_bounds(&self, ts: u64) -> (u64, u64) {
        let start = ts - ts % self.slice_width_ms;
        (start, start + self.slice_width_ms)
    }

    /// Returns the slice covering `ts`, creating it through `factory(start,
    /// end)` if absent.
    pub fn get_slice_or_create(&self, ts: u64, factory: impl FnOnce(u64, u64) -> S) -> Arc<S> {
        let (start, end) = self.slice_bounds(ts);
        let mut slices = self.slices.lock();
        Arc::clone(
            &slices
                .entry(start)
                .or_insert_with(|| SliceEntry {
                    slice: Arc::new(factory(start, end)),
                    emitted: false,
                })
                .slice,
        )
    }

    /// Extracts all slices with `end <= watermark` that have not been
    /// extracted before, marking them emitted atomically.
    pub fn collect_triggerable(&self, watermark: u64) -> Vec<Arc<S>> {
        let mut slices = self.slices.lock();
        slices
            .values_mut()
            .filter(|entry| !entry.emitted && entry.slice.end() <= watermark)
            .map(|entry| {
                entry.emitted = true;
                Arc::clone(&entry.slice)
            })
            .collect()
    }

    /// Extracts every remaining slice regardless of watermarks; used at
    /// query termination.
    pub fn collect_remaining(&self) -> Vec<Arc<S>> {
        let mut slices = self.slices.lock();
        slices
            .values_mut()
            .filter(|entry| !entry.emitted)
            .map(|entry| {
                entry.emitted = true;
                Arc::clone(&entry.slice)
            })
            .collect()
    }

    /// All slices intersecting `[start, end)`, emitted or not.
    pub fn get_by_range(&self, start: u64, end: u64) -> Vec<Arc<S>> {
        let slices = self.slices.lock();
        slices
            .values()
            .filter(|entry| entry.slice.start() < end && entry.slice.end() > start)
            .map(|entry| Arc::clone(&entry.slice))
            .collect()
    }

    /// Removes slices matching `predicate`; outstanding references keep
    /// their state alive until the consumer drops them.
    pub fn erase_if(&self, predicate: impl Fn(&S) -> bool) {
        self.slices.lock().retain(|_, entry| !predicate(&entry.slice));
    }

    /// The start of the earliest stored slice.
    pub fn min_start(&self) -> Option<u64> {
        self.slices.lock().keys().next().copied()
    }

    /// The end of the latest stored slice.
    pub fn max_end(&self) -> Option<u64> {
        self.slices
            .lock()
            .values()
            .next_back()
            .map(|entry| entry.slice.end())
    }

    pub fn len(&self) -> usize {
        self.slices.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestSlice {
        start: u64,
        end: u64,
    }

    impl WindowSlice for TestSlice {
        fn start(&self) -> u64 {
            self.start
        }

        fn end(&self) -> u64 {
            self.end
        }
    }

    fn store() -> SliceStore<TestSlice> {
        SliceStore::new(1000)
    }

    #[test]
    fn slices_are_created_once_per_interval() {
        let store = store();
        let a = store.get_slice_or_create(1000, |start, end| TestSlice { start, end });
        let b = store.get_slice_or_create(1999, |start, end| TestSlice { start, end });
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!((a.start(), a.end()), (1000, 2000));
        assert_eq!(store.len(), 1);

        store.get_slice_or_create(2000, |start, end| TestSlice { start, end });
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn triggerable_slices_are_extracted_exactly_once() {
        let store = store();
        store.get_slice_or_create(500, |start, end| TestSlice { start, end });
        store.get_slice_or_create(1500, |start, end| TestSlice { start, end });

        let triggered = store.collect_triggerable(2000);
        assert_eq!(triggered.len(), 2);
        assert!(store.collect_triggerable(2000).is_empty());
    }

    #[test]
    fn watermark_gates_triggering() {
        let store = store();
        store.get_slice_or_create(500, |start, end| TestSlice { start, end });
        store.get_slice_or_create(1500, |start, end| TestSlice { start, end });

        let triggered = store.collect_triggerable(1000);
        assert_eq!(triggered.len(), 1);
        assert_eq!(triggered[0].end(), 1000);

        let remaining = store.collect_remaining();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].end(), 2000);
    }

    #[test]
    fn range_lookup_and_erase() {
        let store = store();
        for ts in [500, 1500, 2500] {
            store.get_slice_or_create(ts, |start, end| TestSlice { start, end });
        }
        assert_eq!(store.get_by_range(1000, 3000).len(), 2);

        store.erase_if(|slice| slice.end() <= 2000);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn concurrent_creation_yields_one_slice() {
        let store = Arc::new(store());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        store.get_slice_or_create(1234, |start, end| TestSlice { start, end });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 1);
    }
}
