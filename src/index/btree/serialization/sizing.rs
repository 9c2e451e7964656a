use std::mem;

use crate::common::types::PAGE_SIZE;

use super::{CHILD_SIZE, INTERNAL_HEADER_SIZE, LEAF_HEADER_SIZE, LEN_PREFIX_SIZE};

/// Estimate `(leaf_max_size, internal_max_size)` for a key/value type
/// from the page size.
///
/// The in-memory size is a rough stand-in for the encoded size, so the
/// result is clamped to a conservative range. Callers with
/// variable-length keys should pick explicit sizes instead.
pub fn estimated_max_sizes<K, V>() -> (usize, usize) {
    let key_size = mem::size_of::<K>().max(1) + LEN_PREFIX_SIZE;
    let value_size = mem::size_of::<V>().max(1) + LEN_PREFIX_SIZE;

    let leaf_max = (PAGE_SIZE - LEAF_HEADER_SIZE) / (key_size + value_size);
    let internal_max = (PAGE_SIZE - INTERNAL_HEADER_SIZE) / (key_size + CHILD_SIZE);

    (leaf_max.clamp(3, 256), internal_max.clamp(3, 256))
}
