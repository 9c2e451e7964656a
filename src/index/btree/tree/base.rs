use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{PageId, HEADER_PAGE_ID, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{BTreeNode, NodeBody, WriteOp};
use crate::index::btree::serialization::{
    deserialize_node, estimated_max_sizes, write_parent_pointer,
};
use crate::index::btree::tree::latch::{LatchedNode, WriteContext};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::HeaderRecords;

/// Concurrent B+Tree index over buffer-pool-resident pages.
///
/// Keys are unique and kept in ascending order; leaves are chained for
/// range scans. Concurrent operations coordinate through latch
/// crabbing: readers hold at most a parent/child pair of shared page
/// latches, writers hold an exclusive root-to-leaf path that shrinks as
/// soon as a node is known to absorb the whole mutation.
pub struct BPlusTree<K, V> {
    index_name: String,
    pub(crate) buffer_pool: Arc<BufferPoolManager>,
    /// Tree-level latch: guards the root page id and the shape of the
    /// root itself.
    pub(crate) root_page_id: RwLock<PageId>,
    pub(crate) leaf_max_size: usize,
    pub(crate) internal_max_size: usize,
    _phantom: PhantomData<(K, V)>,
}

impl<K, V> BPlusTree<K, V>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Open the named index, adopting the root recorded in the header
    /// page if the index already exists. Node capacities below 3 are
    /// not representable and are bumped up.
    pub fn new(
        index_name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self, BTreeError> {
        let index_name = index_name.into();

        let recorded_root = {
            let header = buffer_pool.fetch_page(HEADER_PAGE_ID)?;
            let page = header.read();
            HeaderRecords::from_page(&page)?.get_root_id(&index_name)
        };

        Ok(Self {
            index_name,
            buffer_pool,
            root_page_id: RwLock::new(recorded_root.unwrap_or(INVALID_PAGE_ID)),
            leaf_max_size: leaf_max_size.max(3),
            internal_max_size: internal_max_size.max(3),
            _phantom: PhantomData,
        })
    }

    /// Open the named index with page-size-derived node capacities.
    pub fn with_estimated_fanout(
        index_name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
    ) -> Result<Self, BTreeError> {
        let (leaf_max, internal_max) = estimated_max_sizes::<K, V>();
        Self::new(index_name, buffer_pool, leaf_max, internal_max)
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn is_empty(&self) -> bool {
        *self.root_page_id.read() == INVALID_PAGE_ID
    }

    /// Current root page id; `INVALID_PAGE_ID` for an empty tree.
    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.read()
    }

    /// Point lookup.
    pub fn get_value(&self, key: &K) -> Result<Option<V>, BTreeError> {
        let root_latch = self.root_page_id.read();
        let root_id = *root_latch;
        if root_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let mut pin = self.buffer_pool.fetch_page(root_id)?;
        let mut latch = pin.read_owned();
        // The root page is latched; the tree latch is no longer needed.
        drop(root_latch);

        loop {
            let node: BTreeNode<K, V> = deserialize_node(&latch)?;
            match node.body {
                NodeBody::Leaf(leaf) => {
                    return Ok(leaf.lookup(key).cloned());
                }
                NodeBody::Internal(internal) => {
                    let child_id = internal.children[internal.child_index_for(key)];
                    let child_pin = self.buffer_pool.fetch_page(child_id)?;
                    let child_latch = child_pin.read_owned();
                    // Crab: the parent latch is only needed until the
                    // child is latched.
                    drop(latch);
                    drop(pin);
                    pin = child_pin;
                    latch = child_latch;
                }
            }
        }
    }

    /// Descend to the leaf responsible for `key` with exclusive
    /// latches, releasing ancestors whenever a child is safe for `op`.
    pub(crate) fn latch_path_for_write<'a>(
        &'a self,
        mut ctx: WriteContext<'a, K, V>,
        key: &K,
        op: WriteOp,
    ) -> Result<WriteContext<'a, K, V>, BTreeError> {
        let mut page_id = match ctx.root_latch.as_ref() {
            Some(root) => **root,
            None => return Err(BTreeError::InvalidPageFormat),
        };

        loop {
            let pin = self.buffer_pool.fetch_page(page_id)?;
            let latch = pin.write_owned();
            let node: BTreeNode<K, V> = deserialize_node(&latch)?;
            let is_leaf = node.is_leaf();
            let safe = node.is_safe(op);

            ctx.stack.push(LatchedNode {
                latch,
                pin,
                node,
                dirty: false,
                deleted: false,
            });
            if safe {
                ctx.release_ancestors()?;
            }
            if is_leaf {
                return Ok(ctx);
            }

            let entry = &ctx.stack[ctx.stack.len() - 1];
            page_id = match &entry.node.body {
                NodeBody::Internal(internal) => {
                    internal.children[internal.child_index_for(key)]
                }
                NodeBody::Leaf(_) => return Err(BTreeError::InvalidPageFormat),
            };
        }
    }

    /// Rewrite the parent pointer of a child page. Children still held
    /// in the latch stack are patched in their working copies; any
    /// other page gets the pointer rewritten in place under a short
    /// exclusive latch.
    pub(crate) fn set_parent_pointer(
        &self,
        ctx: &mut WriteContext<'_, K, V>,
        child_id: PageId,
        parent_id: PageId,
    ) -> Result<(), BTreeError> {
        if let Some(entry) = ctx
            .stack
            .iter_mut()
            .find(|e| e.node.header.page_id == child_id)
        {
            entry.node.header.parent_page_id = parent_id;
            entry.dirty = true;
            return Ok(());
        }

        let pin = self.buffer_pool.fetch_page(child_id)?;
        {
            let mut page = pin.write();
            write_parent_pointer(&mut page, parent_id);
        }
        Ok(())
    }

    /// Mirror a root change into the persistent header-page record.
    pub(crate) fn update_root_record(&self, root_page_id: PageId) -> Result<(), BTreeError> {
        let header = self.buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        let mut page = header.write();
        let mut records = HeaderRecords::from_page(&page)?;
        records.upsert_record(&self.index_name, root_page_id);
        records.write_to(&mut page)?;
        Ok(())
    }
}
