use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};

use crate::common::types::PAGE_SIZE;

/// In-memory image of one disk page.
///
/// A `Page` is only the content buffer; the frame metadata (pin count,
/// dirty flag, resident page id) belongs to the buffer pool, which guards
/// it with the pool latch. The `RwLock` wrapping every `Page` is the
/// per-page reader/writer latch protecting the content itself.
#[derive(Debug)]
pub struct Page {
    pub data: [u8; PAGE_SIZE],
}

impl Page {
    pub fn new() -> Self {
        Self {
            data: [0; PAGE_SIZE],
        }
    }

    /// Zero the buffer before the frame is reused for another page.
    pub fn reset(&mut self) {
        self.data.fill(0);
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

/// Smart pointer to a latched page
pub type PagePtr = Arc<RwLock<Page>>;

/// Owned shared latch on a page, held across buffer pool calls during
/// latch crabbing.
pub type PageReadLatch = ArcRwLockReadGuard<RawRwLock, Page>;

/// Owned exclusive latch on a page.
pub type PageWriteLatch = ArcRwLockWriteGuard<RawRwLock, Page>;
