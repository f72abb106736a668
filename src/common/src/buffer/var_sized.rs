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

use super::manager::BufferProvider;
use super::tuple_buffer::TupleBuffer;
use crate::error::Result;

/// Packed `(child-index, byte-offset)` identifier of a variable-sized value.
///
/// Fits in 64 bits so that a VARSIZED tuple field can store it inline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VariableSizedAccess {
    child_index: u32,
    offset: u32,
}

static_assertions::const_assert_eq!(std::mem::size_of::<VariableSizedAccess>(), 8);

impl VariableSizedAccess {
    pub fn new(child_index: u32, offset: u32) -> Self {
        Self {
            child_index,
            offset,
        }
    }

    pub fn child_index(&self) -> u32 {
        self.child_index
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn pack(&self) -> u64 {
        ((self.child_index as u64) << 32) | self.offset as u64
    }

    pub fn unpack(packed: u64) -> Self {
        Self {
            child_index: (packed >> 32) as u32,
            offset: packed as u32,
        }
    }
}

const LENGTH_PREFIX_SIZE: usize = std::mem::size_of::<u32>();

/// Acquires a buffer able to hold `needed` bytes: a pooled one when the value
/// fits and one is free, an unpooled allocation otherwise.
fn get_new_buffer_for_var_sized(
    provider: &dyn BufferProvider,
    needed: usize,
) -> Result<TupleBuffer> {
    if provider.buffer_size() > needed {
        if let Some(buffer) = provider.get_buffer_no_blocking() {
            return Ok(buffer);
        }
    }
    provider.get_unpooled_buffer(needed)
}

fn copy_var_sized(
    child: &TupleBuffer,
    offset: u32,
    value: &[u8],
    prepend_length: bool,
) -> Result<()> {
    let prepend = if prepend_length { LENGTH_PREFIX_SIZE } else { 0 };
    if prepend_length {
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        LittleEndian::write_u32(&mut prefix, value.len() as u32);
        child.write_bytes(offset as usize, &prefix)?;
    }
    child.write_bytes(offset as usize + prepend, value)?;
    // A child buffer reuses the tuple counter to track bytes used.
    child.set_number_of_tuples(child.number_of_tuples() + (value.len() + prepend) as u64);
    Ok(())
}

fn write(
    buffer: &TupleBuffer,
    provider: &dyn BufferProvider,
    value: &[u8],
    prepend_length: bool,
) -> Result<VariableSizedAccess> {
    let prepend = if prepend_length { LENGTH_PREFIX_SIZE } else { 0 };
    let total_len = value.len() + prepend;

    let num_children = buffer.number_of_child_buffers();
    if num_children == 0 {
        let child = get_new_buffer_for_var_sized(provider, total_len)?;
        copy_var_sized(&child, 0, value, prepend_length)?;
        let index = buffer.store_child_buffer(child);
        return Ok(VariableSizedAccess::new(index, 0));
    }

    let last = buffer.load_child_buffer(num_children - 1)?;
    let used = last.number_of_tuples() as usize;
    if used + total_len >= last.capacity() {
        let child = get_new_buffer_for_var_sized(provider, total_len)?;
        copy_var_sized(&child, 0, value, prepend_length)?;
        let index = buffer.store_child_buffer(child);
        return Ok(VariableSizedAccess::new(index, 0));
    }

    copy_var_sized(&last, used as u32, value, prepend_length)?;
    Ok(VariableSizedAccess::new(num_children - 1, used as u32))
}

/// Writes `[u32 length][bytes]` into a child buffer of `buffer` and returns
/// the access identifier to store in the tuple field.
pub fn write_var_sized_with_length_prefix(
    buffer: &TupleBuffer,
    provider: &dyn BufferProvider,
    value: &[u8],
) -> Result<VariableSizedAccess> {
    write(buffer, provider, value, true)
}

/// Same as [`write_var_sized_with_length_prefix`] without the length prefix;
/// the length is carried out-of-band.
pub fn write_var_sized(
    buffer: &TupleBuffer,
    provider: &dyn BufferProvider,
    value: &[u8],
) -> Result<VariableSizedAccess> {
    write(buffer, provider, value, false)
}

/// Resolves a length-prefixed variable-sized value back into bytes.
pub fn read_var_sized_with_length_prefix(
    buffer: &TupleBuffer,
    access: VariableSizedAccess,
) -> Result<Vec<u8>> {
    let child = buffer.load_child_buffer(access.child_index())?;
    let prefix = child.read_bytes(access.offset() as usize, LENGTH_PREFIX_SIZE)?;
    let len = LittleEndian::read_u32(prefix) as usize;
    Ok(child
        .read_bytes(access.offset() as usize + LENGTH_PREFIX_SIZE, len)?
        .to_vec())
}

/// Resolves a variable-sized value of externally known length.
pub fn read_var_sized(
    buffer: &TupleBuffer,
    access: VariableSizedAccess,
    len: usize,
) -> Result<Vec<u8>> {
    let child = buffer.load_child_buffer(access.child_index())?;
    Ok(child.read_bytes(access.offset() as usize, len)?.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferManager;

    #[test]
    fn access_packing_round_trip() {
        let access = VariableSizedAccess::new(7, 4095);
        assert_eq!(VariableSizedAccess::unpack(access.pack()), access);
    }

    #[test]
    fn values_pack_into_one_child_until_full() {
        let pool = BufferManager::new(64, 4).unwrap();
        let buffer = pool.get_buffer_no_blocking().unwrap();

        let a = write_var_sized_with_length_prefix(&buffer, &pool, b"hello").unwrap();
        let b = write_var_sized_with_length_prefix(&buffer, &pool, b"world!").unwrap();
        assert_eq!(buffer.number_of_child_buffers(), 1);
        assert_eq!(a.child_index(), b.child_index());
        assert_eq!(b.offset() as usize, 4 + 5);

        assert_eq!(
            read_var_sized_with_length_prefix(&buffer, a).unwrap(),
            b"hello"
        );
        assert_eq!(
            read_var_sized_with_length_prefix(&buffer, b).unwrap(),
            b"world!"
        );
    }

    #[test]
    fn full_child_rolls_over_to_a_new_one() {
        let pool = BufferManager::new(32, 4).unwrap();
        let buffer = pool.get_buffer_no_blocking().unwrap();

        write_var_sized(&buffer, &pool, &[0xaa; 20]).unwrap();
        let second = write_var_sized(&buffer, &pool, &[0xbb; 20]).unwrap();
        assert_eq!(buffer.number_of_child_buffers(), 2);
        assert_eq!(second.child_index(), 1);
        assert_eq!(second.offset(), 0);
        assert_eq!(read_var_sized(&buffer, second, 20).unwrap(), vec![0xbb; 20]);
    }

    #[test]
    fn oversized_value_uses_an_unpooled_child() {
        let pool = BufferManager::new(32, 2).unwrap();
        let buffer = pool.get_buffer_no_blocking().unwrap();

        let payload: Vec<u8> = (0..200u16).map(|i| i as u8).collect();
        let access = write_var_sized_with_length_prefix(&buffer, &pool, &payload).unwrap();

        // The child holding it is larger than any pooled buffer.
        let child = buffer.load_child_buffer(access.child_index()).unwrap();
        assert!(child.capacity() > pool.buffer_size());
        assert_eq!(pool.num_free_buffers(), 1);

        assert_eq!(
            read_var_sized_with_length_prefix(&buffer, access).unwrap(),
            payload
        );
    }
}
