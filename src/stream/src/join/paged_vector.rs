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

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Result, StreamError};

/// An append-only vector of fixed-width rows stored in pages.
///
/// Appends never move existing rows, so readers holding row references
/// across appends stay valid. Single-writer per instance; instances are
/// partitioned by worker thread.
pub struct PagedVector {
    entry_size: usize,
    entries_per_page: usize,
    pages: Vec<Vec<u8>>,
    len: usize,
}

impl PagedVector {
    pub fn new(entry_size: usize, page_size: usize) -> Self {
        debug_assert!(entry_size > 0);
        Self {
            entry_size,
            entries_per_page: (page_size / entry_size).max(1),
            pages: vec![],
            len: 0,
        }
    }

    pub fn entry_size(&self) -> usize {
        self.entry_size
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn append(&mut self, row: &[u8]) -> Result<()> {
        if row.len() != self.entry_size {
            return Err(StreamError::CorruptOperatorState(format!(
                "row of {} bytes in a vector of {}-byte entries",
                row.len(),
                self.entry_size
            )));
        }
        let offset_in_page = (self.len % self.entries_per_page) * self.entry_size;
        if offset_in_page == 0 {
            self.pages
                .push(Vec::with_capacity(self.entries_per_page * self.entry_size));
        }
        let page = self
            .pages
            .last_mut()
            .unwrap_or_else(|| unreachable!("page pushed above"));
        page.extend_from_slice(row);
        self.len += 1;
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<&[u8]> {
        if index >= self.len {
            return None;
        }
        let page = &self.pages[index / self.entries_per_page];
        let offset = (index % self.entries_per_page) * self.entry_size;
        Some(&page[offset..offset + self.entry_size])
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        (0..self.len).map(|index| {
            self.get(index)
                .unwrap_or_else(|| unreachable!("index bounded by len"))
        })
    }

    /// The raw byte image: row count followed by the rows.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.len * self.entry_size);
        let mut scratch = [0u8; 8];
        LittleEndian::write_u64(&mut scratch, self.len as u64);
        out.extend_from_slice(&scratch);
        for row in self.iter() {
            out.extend_from_slice(row);
        }
        out
    }

    pub fn deserialize(bytes: &[u8], entry_size: usize, page_size: usize) -> Result<PagedVector> {
        if bytes.len() < 8 {
            return Err(StreamError::CorruptOperatorState(
                "paged vector image shorter than its header".to_owned(),
            ));
        }
        let count = LittleEndian::read_u64(&bytes[..8]) as usize;
        if bytes.len() != 8 + count * entry_size {
            return Err(StreamError::CorruptOperatorState(format!(
                "paged vector image of {} bytes cannot hold {count} rows",
                bytes.len()
            )));
        }
        let mut vector = PagedVector::new(entry_size, page_size);
        for index in 0..count {
            let offset = 8 + index * entry_size;
            vector.append(&bytes[offset..offset + entry_size])?;
        }
        Ok(vector)
    }
}
