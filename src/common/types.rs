use serde::{Deserialize, Serialize};

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type. Negative values are sentinels.
pub type PageId = i32;

/// Sentinel for "no page".
pub const INVALID_PAGE_ID: PageId = -1;

/// Page 0 is reserved for the header page holding index roots.
pub const HEADER_PAGE_ID: PageId = 0;

/// Buffer pool frame ID type, always in `[0, pool_size)`.
pub type FrameId = usize;

/// Transaction ID type
pub type TxnId = u32;

/// Record identifier: the page a tuple lives on plus its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rid {
    pub page_id: PageId,
    pub slot_num: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot_num: u32) -> Self {
        Self { page_id, slot_num }
    }
}
