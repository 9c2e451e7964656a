use log::debug;
use parking_lot::RwLockWriteGuard;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{PageId, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{BTreeNode, NodeBody, WriteOp};
use crate::index::btree::serialization::serialize_node;
use crate::index::btree::tree::latch::WriteContext;
use crate::storage::buffer::PageGuard;

use super::base::BPlusTree;

impl<K, V> BPlusTree<K, V>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Insert a key/value pair. Returns false (and leaves the tree
    /// untouched) if the key already exists.
    pub fn insert(&self, key: K, value: V) -> Result<bool, BTreeError> {
        let mut root_latch = self.root_page_id.write();
        if *root_latch == INVALID_PAGE_ID {
            self.start_new_tree(&mut root_latch, key, value)?;
            return Ok(true);
        }

        let ctx = WriteContext::new(root_latch);
        let mut ctx = self.latch_path_for_write(ctx, &key, WriteOp::Insert)?;

        let leaf_level = ctx.stack.len() - 1;
        {
            let leaf = ctx.stack[leaf_level]
                .node
                .as_leaf()
                .ok_or(BTreeError::InvalidPageFormat)?;
            if leaf.lookup(&key).is_some() {
                ctx.release_all()?;
                return Ok(false);
            }
        }

        // Reserve every page this insert can need before mutating
        // anything, so an exhausted pool fails the operation cleanly.
        let splits = self.count_pending_splits(&ctx);
        let mut fresh_pages = Vec::with_capacity(splits);
        for _ in 0..splits {
            fresh_pages.push(self.buffer_pool.new_page()?);
        }
        let new_root_pin = if splits == ctx.stack.len() && ctx.stack[0].node.is_root() {
            Some(self.buffer_pool.new_page()?)
        } else {
            None
        };

        {
            let entry = &mut ctx.stack[leaf_level];
            let leaf = entry
                .node
                .as_leaf_mut()
                .ok_or(BTreeError::InvalidPageFormat)?;
            leaf.insert(key, value);
            entry.dirty = true;
        }

        if ctx.stack[leaf_level].node.size() > self.leaf_max_size {
            self.propagate_splits(&mut ctx, fresh_pages, new_root_pin)?;
        }

        ctx.release_all()?;
        Ok(true)
    }

    /// First insert into an empty tree: allocate a leaf root and record
    /// it in the header page. Runs under the tree-level latch.
    fn start_new_tree(
        &self,
        root_latch: &mut RwLockWriteGuard<'_, PageId>,
        key: K,
        value: V,
    ) -> Result<(), BTreeError> {
        let pin = self.buffer_pool.new_page()?;
        let page_id = pin.page_id();

        let mut node: BTreeNode<K, V> =
            BTreeNode::new_leaf(page_id, INVALID_PAGE_ID, self.leaf_max_size);
        if let Some(leaf) = node.as_leaf_mut() {
            leaf.entries.push((key, value));
        }
        {
            let mut page = pin.write();
            serialize_node(&node, &mut page)?;
        }
        drop(pin);

        **root_latch = page_id;
        self.update_root_record(page_id)?;
        debug!("btree {}: started new tree at root {}", self.index_name(), page_id);
        Ok(())
    }

    /// Number of nodes on the latched path that will split if one entry
    /// is added to the leaf: the full suffix of the stack.
    fn count_pending_splits(&self, ctx: &WriteContext<'_, K, V>) -> usize {
        let mut count = 0;
        for entry in ctx.stack.iter().rev() {
            let full = match &entry.node.body {
                NodeBody::Leaf(leaf) => leaf.entries.len() >= self.leaf_max_size,
                NodeBody::Internal(internal) => {
                    internal.children.len() >= self.internal_max_size
                }
            };
            if !full {
                break;
            }
            count += 1;
        }
        count
    }

    /// Split the overflowing leaf and walk the overflow up the latched
    /// path, consuming one reserved page per split (plus one for a new
    /// root when the split reaches it).
    fn propagate_splits(
        &self,
        ctx: &mut WriteContext<'_, K, V>,
        fresh_pages: Vec<PageGuard<'_>>,
        mut new_root_pin: Option<PageGuard<'_>>,
    ) -> Result<(), BTreeError> {
        let mut fresh = fresh_pages.into_iter();
        let mut level = ctx.stack.len() - 1;

        loop {
            let overflow = match &ctx.stack[level].node.body {
                NodeBody::Leaf(leaf) => leaf.entries.len() > self.leaf_max_size,
                NodeBody::Internal(internal) => {
                    internal.children.len() > self.internal_max_size
                }
            };
            if !overflow {
                break;
            }

            let new_pin = fresh.next().ok_or(BTreeError::InvalidPageFormat)?;
            let new_page_id = new_pin.page_id();
            let old_id = ctx.stack[level].node.header.page_id;
            let parent_of_old = ctx.stack[level].node.header.parent_page_id;

            // Carve the upper half out of the overflowing node.
            let (separator, mut new_node) = match &mut ctx.stack[level].node.body {
                NodeBody::Leaf(leaf) => {
                    let upper = leaf.split_upper();
                    let separator = upper[0].0.clone();
                    let mut sibling: BTreeNode<K, V> =
                        BTreeNode::new_leaf(new_page_id, parent_of_old, self.leaf_max_size);
                    if let Some(new_leaf) = sibling.as_leaf_mut() {
                        new_leaf.entries = upper;
                        new_leaf.next_page_id = leaf.next_page_id;
                    }
                    leaf.next_page_id = new_page_id;
                    (separator, sibling)
                }
                NodeBody::Internal(internal) => {
                    let (separator, right_keys, right_children) = internal.split_upper();
                    let mut sibling: BTreeNode<K, V> = BTreeNode::new_internal(
                        new_page_id,
                        parent_of_old,
                        self.internal_max_size,
                    );
                    if let Some(new_internal) = sibling.as_internal_mut() {
                        new_internal.keys = right_keys;
                        new_internal.children = right_children;
                    }
                    (separator, sibling)
                }
            };
            ctx.stack[level].dirty = true;
            debug!(
                "btree {}: split node {} into sibling {} at level {}",
                self.index_name(),
                old_id,
                new_page_id,
                level
            );

            // An internal sibling adopted the upper children; their
            // parent pointers move with them.
            if let Some(new_internal) = new_node.as_internal() {
                let moved = new_internal.children.clone();
                for child_id in moved {
                    self.set_parent_pointer(ctx, child_id, new_page_id)?;
                }
            }

            if level == 0 {
                // The root itself split: grow the tree by one level.
                let root_pin = new_root_pin
                    .take()
                    .ok_or(BTreeError::InvalidPageFormat)?;
                let root_id = root_pin.page_id();

                let mut root_node: BTreeNode<K, V> =
                    BTreeNode::new_internal(root_id, INVALID_PAGE_ID, self.internal_max_size);
                if let Some(root_internal) = root_node.as_internal_mut() {
                    root_internal.keys.push(separator);
                    root_internal.children.push(old_id);
                    root_internal.children.push(new_page_id);
                }

                ctx.stack[0].node.header.parent_page_id = root_id;
                ctx.stack[0].dirty = true;
                new_node.header.parent_page_id = root_id;

                {
                    let mut page = new_pin.write();
                    serialize_node(&new_node, &mut page)?;
                }
                drop(new_pin);
                {
                    let mut page = root_pin.write();
                    serialize_node(&root_node, &mut page)?;
                }
                drop(root_pin);

                ctx.set_root(root_id);
                self.update_root_record(root_id)?;
                debug!("btree {}: grew new root {}", self.index_name(), root_id);
                break;
            }

            // Hand the separator to the parent, right after the slot
            // pointing at the old node.
            {
                let parent = &mut ctx.stack[level - 1];
                let parent_internal = parent
                    .node
                    .as_internal_mut()
                    .ok_or(BTreeError::InvalidPageFormat)?;
                let slot = parent_internal
                    .slot_of(old_id)
                    .ok_or(BTreeError::InvalidPageFormat)?;
                parent_internal.insert_child_after(slot, separator, new_page_id);
                parent.dirty = true;
            }

            {
                let mut page = new_pin.write();
                serialize_node(&new_node, &mut page)?;
            }
            drop(new_pin);

            level -= 1;
        }

        Ok(())
    }
}
