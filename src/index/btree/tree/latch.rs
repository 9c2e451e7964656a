use parking_lot::RwLockWriteGuard;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::PageId;
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::BTreeNode;
use crate::index::btree::serialization::serialize_node;
use crate::storage::buffer::PageGuard;
use crate::storage::page::PageWriteLatch;

/// One node on the write path: the exclusive page latch, the pin, and
/// the deserialized working copy. The working copy is written back to
/// the page when the latch is released, if it was modified.
///
/// Field order matters: the latch must drop before the pin, so a frame
/// can never be recycled while its content latch is still held.
pub(crate) struct LatchedNode<'a, K, V> {
    pub latch: PageWriteLatch,
    pub pin: PageGuard<'a>,
    pub node: BTreeNode<K, V>,
    pub dirty: bool,
    pub deleted: bool,
}

impl<K, V> LatchedNode<'_, K, V>
where
    K: Serialize,
    V: Serialize,
{
    /// Write the working copy back (if modified) and release latch and
    /// pin. Nodes scheduled for deletion are not written back.
    pub fn release(mut self) -> Result<(), BTreeError> {
        if self.dirty && !self.deleted {
            serialize_node(&self.node, &mut self.latch)?;
            self.pin.mark_dirty();
        }
        Ok(())
    }
}

/// The ordered latch set held by one mutating tree operation.
///
/// The tree-level latch guarding `root_page_id` sits at the head as a
/// sentinel; page latches follow in root-to-leaf order. Ancestors are
/// released as soon as a safe child bounds the scope of the mutation,
/// the sentinel last. Pages emptied by merges are recorded in
/// `deleted_pages` and freed by the caller only after every latch and
/// pin is gone.
pub(crate) struct WriteContext<'a, K, V> {
    pub root_latch: Option<RwLockWriteGuard<'a, PageId>>,
    pub stack: Vec<LatchedNode<'a, K, V>>,
    pub deleted_pages: Vec<PageId>,
}

impl<'a, K, V> WriteContext<'a, K, V>
where
    K: Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    pub fn new(root_latch: RwLockWriteGuard<'a, PageId>) -> Self {
        Self {
            root_latch: Some(root_latch),
            stack: Vec::new(),
            deleted_pages: Vec::new(),
        }
    }

    /// Update the root page id through the held sentinel.
    pub fn set_root(&mut self, page_id: PageId) {
        debug_assert!(self.root_latch.is_some());
        if let Some(root) = self.root_latch.as_mut() {
            **root = page_id;
        }
    }

    /// Release every latch above the most recently pushed node, the
    /// tree-level sentinel last. Called when that node is safe for the
    /// operation in progress.
    pub fn release_ancestors(&mut self) -> Result<(), BTreeError> {
        while self.stack.len() > 1 {
            let entry = self.stack.remove(0);
            entry.release()?;
        }
        self.root_latch = None;
        Ok(())
    }

    /// Release the whole latch set, root-to-leaf order, sentinel last.
    pub fn release_all(&mut self) -> Result<(), BTreeError> {
        while !self.stack.is_empty() {
            let entry = self.stack.remove(0);
            entry.release()?;
        }
        self.root_latch = None;
        Ok(())
    }
}
