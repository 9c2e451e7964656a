use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{PageId, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{BTreeNode, NodeBody};
use crate::index::btree::serialization::deserialize_node;

use super::base::BPlusTree;

/// Forward iterator over the leaf chain, yielding `(key, value)` pairs
/// in ascending key order.
///
/// Each leaf is latched in shared mode just long enough to snapshot its
/// entries, so the iterator never holds more than one page latch and
/// never blocks writers for longer than one leaf copy.
pub struct TreeIterator<'a, K, V> {
    tree: &'a BPlusTree<K, V>,
    current: std::vec::IntoIter<(K, V)>,
    next_page_id: PageId,
    failed: bool,
}

impl<K, V> Iterator for TreeIterator<'_, K, V>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Item = Result<(K, V), BTreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if let Some(entry) = self.current.next() {
                return Some(Ok(entry));
            }
            if self.next_page_id == INVALID_PAGE_ID {
                return None;
            }
            match self.tree.load_leaf_snapshot(self.next_page_id) {
                Ok((entries, next_page_id)) => {
                    self.current = entries.into_iter();
                    self.next_page_id = next_page_id;
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

impl<K, V> BPlusTree<K, V>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Iterate over all entries in ascending key order.
    pub fn iter(&self) -> Result<TreeIterator<'_, K, V>, BTreeError> {
        self.make_iterator(None)
    }

    /// Iterate over entries with keys `>= key` in ascending order.
    pub fn iter_from(&self, key: &K) -> Result<TreeIterator<'_, K, V>, BTreeError> {
        self.make_iterator(Some(key))
    }

    fn make_iterator(&self, start: Option<&K>) -> Result<TreeIterator<'_, K, V>, BTreeError> {
        let root_latch = self.root_page_id.read();
        let root_id = *root_latch;
        if root_id == INVALID_PAGE_ID {
            return Ok(TreeIterator {
                tree: self,
                current: Vec::new().into_iter(),
                next_page_id: INVALID_PAGE_ID,
                failed: false,
            });
        }

        let mut pin = self.buffer_pool.fetch_page(root_id)?;
        let mut latch = pin.read_owned();
        drop(root_latch);

        loop {
            let node: BTreeNode<K, V> = deserialize_node(&latch)?;
            match node.body {
                NodeBody::Leaf(leaf) => {
                    let mut entries = leaf.entries;
                    if let Some(key) = start {
                        let skip = entries.partition_point(|(k, _)| k < key);
                        entries.drain(..skip);
                    }
                    return Ok(TreeIterator {
                        tree: self,
                        current: entries.into_iter(),
                        next_page_id: leaf.next_page_id,
                        failed: false,
                    });
                }
                NodeBody::Internal(internal) => {
                    let child_index = match start {
                        Some(key) => internal.child_index_for(key),
                        None => 0,
                    };
                    let child_id = internal.children[child_index];
                    let child_pin = self.buffer_pool.fetch_page(child_id)?;
                    let child_latch = child_pin.read_owned();
                    drop(latch);
                    drop(pin);
                    pin = child_pin;
                    latch = child_latch;
                }
            }
        }
    }

    /// Copy one leaf's entries and its forward link under a shared
    /// latch.
    pub(crate) fn load_leaf_snapshot(
        &self,
        page_id: PageId,
    ) -> Result<(Vec<(K, V)>, PageId), BTreeError> {
        let pin = self.buffer_pool.fetch_page(page_id)?;
        let latch = pin.read_owned();
        let node: BTreeNode<K, V> = deserialize_node(&latch)?;
        match node.body {
            NodeBody::Leaf(leaf) => Ok((leaf.entries, leaf.next_page_id)),
            NodeBody::Internal(_) => Err(BTreeError::InvalidPageFormat),
        }
    }
}
