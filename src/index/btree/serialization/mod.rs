mod decoding;
mod encoding;
mod sizing;

pub use decoding::deserialize_node;
pub use encoding::{serialize_node, write_parent_pointer};
pub use sizing::estimated_max_sizes;

/// On-page node layout, shared by encoding and decoding:
///
/// - `page_type: u8`    (1 = leaf, 2 = internal)
/// - `size: u32`        (leaf: entry count; internal: child count)
/// - `max_size: u32`
/// - `parent_page_id: i32`
/// - `page_id: i32`
/// - `next_page_id: i32` (leaf nodes only)
///
/// followed by the packed entries in sorted key order. Keys and values
/// are bincode-encoded with a u16 length prefix; child pointers are raw
/// i32.
pub(crate) const PAGE_TYPE_LEAF: u8 = 1;
pub(crate) const PAGE_TYPE_INTERNAL: u8 = 2;

pub(crate) const SIZE_OFFSET: usize = 1;
pub(crate) const MAX_SIZE_OFFSET: usize = 5;
pub(crate) const PARENT_OFFSET: usize = 9;
pub(crate) const PAGE_ID_OFFSET: usize = 13;
pub(crate) const NEXT_OFFSET: usize = 17;

pub(crate) const INTERNAL_HEADER_SIZE: usize = 17;
pub(crate) const LEAF_HEADER_SIZE: usize = 21;

pub(crate) const LEN_PREFIX_SIZE: usize = 2;
pub(crate) const CHILD_SIZE: usize = 4;
