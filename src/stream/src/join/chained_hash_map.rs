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

/// A bucket-chained hash map over raw fixed-width keys and values.
///
/// Entries live in one append-only arena; buckets hold the head of a chain
/// of entry indices. Single-writer per instance (instances are partitioned
/// by worker thread), readers only run after the watermark proves build-side
/// quiescence. The layout serializes to raw bytes and back without losing
/// chain structure.
pub struct ChainedHashMap {
    key_size: usize,
    value_size: usize,
    buckets: Vec<Option<u32>>,
    /// Chain successor per entry.
    next: Vec<Option<u32>>,
    hashes: Vec<u64>,
    /// Entry `i`'s key and value at `i * (key_size + value_size)`.
    data: Vec<u8>,
}

impl ChainedHashMap {
    pub fn new(key_size: usize, value_size: usize, num_buckets: usize) -> Self {
        debug_assert!(num_buckets.is_power_of_two());
        Self {
            key_size,
            value_size,
            buckets: vec![None; num_buckets],
            next: vec![],
            hashes: vec![],
            data: vec![],
        }
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    pub fn value_size(&self) -> usize {
        self.value_size
    }

    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    fn entry_size(&self) -> usize {
        self.key_size + self.value_size
    }

    fn bucket_of(&self, hash: u64) -> usize {
        (hash as usize) & (self.buckets.len() - 1)
    }

    pub fn insert(&mut self, hash: u64, key: &[u8], value: &[u8]) -> Result<()> {
        if key.len() != self.key_size || value.len() != self.value_size {
            return Err(StreamError::CorruptOperatorState(format!(
                "entry size mismatch: key {} of {}, value {} of {}",
                key.len(),
                self.key_size,
                value.len(),
                self.value_size
            )));
        }
        let index = self.hashes.len() as u32;
        let bucket = self.bucket_of(hash);
        self.hashes.push(hash);
        self.next.push(self.buckets[bucket]);
        self.buckets[bucket] = Some(index);
        self.data.extend_from_slice(key);
        self.data.extend_from_slice(value);
        Ok(())
    }

    fn entry_data(&self, index: u32) -> (&[u8], &[u8]) {
        let offset = index as usize * self.entry_size();
        let key = &self.data[offset..offset + self.key_size];
        let value = &self.data[offset + self.key_size..offset + self.entry_size()];
        (key, value)
    }

    /// All values whose key matches `key` under `hash`.
    pub fn lookup<'a>(&'a self, hash: u64, key: &'a [u8]) -> impl Iterator<Item = &'a [u8]> {
        let mut cursor = self.buckets[self.bucket_of(hash)];
        std::iter::from_fn(move || {
            while let Some(index) = cursor {
                cursor = self.next[index as usize];
                let (entry_key, value) = self.entry_data(index);
                if self.hashes[index as usize] == hash && entry_key == key {
                    return Some(value);
                }
            }
            None
        })
    }

    /// Every entry in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &[u8], &[u8])> {
        (0..self.hashes.len() as u32).map(|index| {
            let (key, value) = self.entry_data(index);
            (self.hashes[index as usize], key, value)
        })
    }

    /// The raw byte image: entry count followed by `(hash, key, value)`
    /// triplets.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.len() * (8 + self.entry_size()));
        let mut scratch = [0u8; 8];
        LittleEndian::write_u64(&mut scratch, self.len() as u64);
        out.extend_from_slice(&scratch);
        for (hash, key, value) in self.iter() {
            LittleEndian::write_u64(&mut scratch, hash);
            out.extend_from_slice(&scratch);
            out.extend_from_slice(key);
            out.extend_from_slice(value);
        }
        out
    }

    /// Rebuilds a map (chains included) from its byte image.
    pub fn deserialize(
        bytes: &[u8],
        key_size: usize,
        value_size: usize,
        num_buckets: usize,
    ) -> Result<ChainedHashMap> {
        if bytes.len() < 8 {
            return Err(StreamError::CorruptOperatorState(
                "hash map image shorter than its header".to_owned(),
            ));
        }
        let count = LittleEndian::read_u64(&bytes[..8]) as usize;
        let entry_size = 8 + key_size + value_size;
        if bytes.len() != 8 + count * entry_size {
            return Err(StreamError::CorruptOperatorState(format!(
                "hash map image of {} bytes cannot hold {count} entries",
                bytes.len()
            )));
        }
        let mut map = ChainedHashMap::new(key_size, value_size, num_buckets);
        for index in 0..count {
            let offset = 8 + index * entry_size;
            let hash = LittleEndian::read_u64(&bytes[offset..offset + 8]);
            let key = &bytes[offset + 8..offset + 8 + key_size];
            let value = &bytes[offset + 8 + key_size..offset + entry_size];
            map.insert(hash, key, value)?;
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chains_preserve_all_values_per_key() {
        let mut map = ChainedHashMap::new(4, 8, 16);
        map.insert(42, &[1, 0, 0, 0], &[1; 8]).unwrap();
        map.insert(42, &[1, 0, 0, 0], &[2; 8]).unwrap();
        map.insert(42, &[2, 0, 0, 0], &[3; 8]).unwrap(); // same hash, other key
        map.insert(7, &[3, 0, 0, 0], &[4; 8]).unwrap();

        let values: Vec<_> = map.lookup(42, &[1, 0, 0, 0]).collect();
        assert_eq!(values.len(), 2);
        assert_eq!(map.lookup(42, &[2, 0, 0, 0]).count(), 1);
        assert_eq!(map.lookup(42, &[9, 0, 0, 0]).count(), 0);
        assert_eq!(map.len(), 4);
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let mut map = ChainedHashMap::new(4, 8, 16);
        assert!(map.insert(1, &[0; 3], &[0; 8]).is_err());
        assert!(map.insert(1, &[0; 4], &[0; 9]).is_err());
    }

    #[test]
    fn serialization_round_trips_bit_identically() {
        let mut map = ChainedHashMap::new(8, 16, 32);
        for i in 0..100u64 {
            let mut key = [0u8; 8];
            LittleEndian::write_u64(&mut key, i % 10);
            map.insert(i % 10, &key, &[i as u8; 16]).unwrap();
        }

        let image = map.serialize();
        let restored = ChainedHashMap::deserialize(&image, 8, 16, 32).unwrap();
        assert_eq!(restored.serialize(), image);

        let mut key = [0u8; 8];
        LittleEndian::write_u64(&mut key, 3);
        assert_eq!(restored.lookup(3, &key).count(), 10);
    }

    #[test]
    fn truncated_image_is_a_typed_error() {
        let mut map = ChainedHashMap::new(4, 4, 8);
        map.insert(1, &[1; 4], &[2; 4]).unwrap();
        let mut image = map.serialize();
        image.pop();
        assert!(matches!(
            ChainedHashMap::deserialize(&image, 4, 4, 8),
            Err(StreamError::CorruptOperatorState(_))
        ));
    }
}
