use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{PageId, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{BTreeNode, NodeBody, WriteOp};
use crate::index::btree::serialization::{deserialize_node, serialize_node};
use crate::index::btree::tree::latch::WriteContext;

use super::base::BPlusTree;

impl<K, V> BPlusTree<K, V>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Remove a key. Removing an absent key is a no-op.
    pub fn remove(&self, key: &K) -> Result<(), BTreeError> {
        let root_latch = self.root_page_id.write();
        if *root_latch == INVALID_PAGE_ID {
            return Ok(());
        }

        let ctx = WriteContext::new(root_latch);
        let mut ctx = self.latch_path_for_write(ctx, key, WriteOp::Remove)?;

        let leaf_level = ctx.stack.len() - 1;
        let removed = {
            let entry = &mut ctx.stack[leaf_level];
            let leaf = entry
                .node
                .as_leaf_mut()
                .ok_or(BTreeError::InvalidPageFormat)?;
            leaf.remove(key)
        };
        if !removed {
            ctx.release_all()?;
            return Ok(());
        }
        ctx.stack[leaf_level].dirty = true;

        self.rebalance_upwards(&mut ctx)?;

        ctx.release_all()?;
        // Emptied pages are freed only now, after every latch and pin on
        // the path is gone.
        for page_id in std::mem::take(&mut ctx.deleted_pages) {
            self.buffer_pool.delete_page(page_id)?;
        }
        Ok(())
    }

    /// Walk from the leaf towards the root, fixing any node that fell
    /// below minimum occupancy by borrowing from or merging with a
    /// sibling. Stops at the first level that needs no repair.
    fn rebalance_upwards(&self, ctx: &mut WriteContext<'_, K, V>) -> Result<(), BTreeError> {
        let mut level = ctx.stack.len() - 1;

        loop {
            if ctx.stack[level].node.is_root() {
                self.adjust_root(ctx)?;
                return Ok(());
            }
            if ctx.stack[level].node.size() >= ctx.stack[level].node.min_size() {
                return Ok(());
            }

            // The node underflowed, so it was unsafe during the descent
            // and its parent is still latched above it.
            if level == 0 {
                return Err(BTreeError::InvalidPageFormat);
            }

            let node_id = ctx.stack[level].node.header.page_id;
            let node_size = ctx.stack[level].node.size();
            let node_is_leaf = ctx.stack[level].node.is_leaf();
            let max_size = if node_is_leaf {
                self.leaf_max_size
            } else {
                self.internal_max_size
            };

            // Locate the node in its parent and pick the sibling: the
            // left neighbour when one exists, otherwise the right one.
            let (slot, sibling_slot, sibling_id) = {
                let parent = ctx.stack[level - 1]
                    .node
                    .as_internal()
                    .ok_or(BTreeError::InvalidPageFormat)?;
                let slot = parent
                    .slot_of(node_id)
                    .ok_or(BTreeError::InvalidPageFormat)?;
                let sibling_slot = if slot > 0 { slot - 1 } else { slot + 1 };
                (slot, sibling_slot, parent.children[sibling_slot])
            };
            let node_is_left = slot == 0;

            let sibling_pin = self.buffer_pool.fetch_page(sibling_id)?;
            let sibling_latch = sibling_pin.write_owned();
            let mut sibling = deserialize_node::<K, V>(&sibling_latch)?;

            if sibling.size() + node_size > max_size {
                // Redistribute a single entry and fix the separator.
                self.redistribute(ctx, level, &mut sibling, slot, node_is_left)?;
                {
                    let mut page_ref = sibling_latch;
                    serialize_node(&sibling, &mut page_ref)?;
                }
                sibling_pin.mark_dirty();
                drop(sibling_pin);
                return Ok(());
            }

            // Merge right into left; the right page dies.
            if node_is_left {
                // The sibling (right) folds into the latched node.
                self.merge_right_into_stack_node(ctx, level, sibling, sibling_slot)?;
                drop(sibling_latch);
                drop(sibling_pin);
                ctx.deleted_pages.push(sibling_id);
            } else {
                // The latched node folds into its left sibling.
                self.merge_stack_node_into_left(ctx, level, &mut sibling, slot)?;
                {
                    let mut page_ref = sibling_latch;
                    serialize_node(&sibling, &mut page_ref)?;
                }
                sibling_pin.mark_dirty();
                drop(sibling_pin);
                ctx.deleted_pages.push(node_id);
            }
            debug!(
                "btree {}: coalesced around node {} at level {}",
                self.index_name(),
                node_id,
                level
            );

            // The parent lost a slot; continue the repair one level up.
            level -= 1;
        }
    }

    /// Move one entry from `sibling` into the underflowed node at
    /// `level` and refresh the separator key in the parent.
    fn redistribute(
        &self,
        ctx: &mut WriteContext<'_, K, V>,
        level: usize,
        sibling: &mut BTreeNode<K, V>,
        slot: usize,
        node_is_left: bool,
    ) -> Result<(), BTreeError> {
        let node_id = ctx.stack[level].node.header.page_id;
        // Separator between the two nodes: left neighbour's slot index.
        let separator_index = if node_is_left { slot } else { slot - 1 };

        let old_separator = {
            let parent = ctx.stack[level - 1]
                .node
                .as_internal()
                .ok_or(BTreeError::InvalidPageFormat)?;
            parent.keys[separator_index].clone()
        };

        let mut adopted_child: Option<PageId> = None;
        let new_separator = match (&mut ctx.stack[level].node.body, &mut sibling.body) {
            (NodeBody::Leaf(node_leaf), NodeBody::Leaf(sibling_leaf)) => {
                if node_is_left {
                    // Borrow the right sibling's first entry; the new
                    // separator is the sibling's new first key.
                    let moved = sibling_leaf.entries.remove(0);
                    node_leaf.entries.push(moved);
                    sibling_leaf.entries[0].0.clone()
                } else {
                    // Borrow the left sibling's last entry; the moved
                    // key itself becomes the separator.
                    let moved = sibling_leaf
                        .entries
                        .pop()
                        .ok_or(BTreeError::InvalidPageFormat)?;
                    let separator = moved.0.clone();
                    node_leaf.entries.insert(0, moved);
                    separator
                }
            }
            (NodeBody::Internal(node_internal), NodeBody::Internal(sibling_internal)) => {
                if node_is_left {
                    // The old separator comes down to the node's tail;
                    // the sibling's first key goes up.
                    let moved_child = sibling_internal.children.remove(0);
                    node_internal.keys.push(old_separator);
                    node_internal.children.push(moved_child);
                    adopted_child = Some(moved_child);
                    sibling_internal.keys.remove(0)
                } else {
                    // The old separator comes down to the node's head;
                    // the sibling's last key goes up.
                    let moved_child = sibling_internal
                        .children
                        .pop()
                        .ok_or(BTreeError::InvalidPageFormat)?;
                    node_internal.keys.insert(0, old_separator);
                    node_internal.children.insert(0, moved_child);
                    adopted_child = Some(moved_child);
                    sibling_internal
                        .keys
                        .pop()
                        .ok_or(BTreeError::InvalidPageFormat)?
                }
            }
            _ => return Err(BTreeError::InvalidPageFormat),
        };
        ctx.stack[level].dirty = true;

        {
            let parent = &mut ctx.stack[level - 1];
            let parent_internal = parent
                .node
                .as_internal_mut()
                .ok_or(BTreeError::InvalidPageFormat)?;
            parent_internal.keys[separator_index] = new_separator;
            parent.dirty = true;
        }

        if let Some(child_id) = adopted_child {
            self.set_parent_pointer(ctx, child_id, node_id)?;
        }
        Ok(())
    }

    /// Fold a right sibling into the latched node at `level` (which is
    /// the left neighbour) and drop the sibling's slot from the parent.
    fn merge_right_into_stack_node(
        &self,
        ctx: &mut WriteContext<'_, K, V>,
        level: usize,
        sibling: BTreeNode<K, V>,
        sibling_slot: usize,
    ) -> Result<(), BTreeError> {
        let node_id = ctx.stack[level].node.header.page_id;
        let separator = {
            let parent = ctx.stack[level - 1]
                .node
                .as_internal()
                .ok_or(BTreeError::InvalidPageFormat)?;
            parent.keys[sibling_slot - 1].clone()
        };

        let mut moved_children: Vec<PageId> = Vec::new();
        match (&mut ctx.stack[level].node.body, sibling.body) {
            (NodeBody::Leaf(left), NodeBody::Leaf(right)) => {
                left.entries.extend(right.entries);
                left.next_page_id = right.next_page_id;
            }
            (NodeBody::Internal(left), NodeBody::Internal(right)) => {
                // The separator comes down to join the two key runs.
                left.keys.push(separator);
                left.keys.extend(right.keys);
                moved_children = right.children.clone();
                left.children.extend(right.children);
            }
            _ => return Err(BTreeError::InvalidPageFormat),
        }
        ctx.stack[level].dirty = true;

        for child_id in moved_children {
            self.set_parent_pointer(ctx, child_id, node_id)?;
        }

        let parent = &mut ctx.stack[level - 1];
        let parent_internal = parent
            .node
            .as_internal_mut()
            .ok_or(BTreeError::InvalidPageFormat)?;
        parent_internal.remove_slot(sibling_slot);
        parent.dirty = true;
        Ok(())
    }

    /// Fold the latched node at `level` into its left sibling and drop
    /// the node's slot from the parent. The node's page is scheduled
    /// for deletion by the caller.
    fn merge_stack_node_into_left(
        &self,
        ctx: &mut WriteContext<'_, K, V>,
        level: usize,
        sibling: &mut BTreeNode<K, V>,
        slot: usize,
    ) -> Result<(), BTreeError> {
        let sibling_id = sibling.header.page_id;
        let separator = {
            let parent = ctx.stack[level - 1]
                .node
                .as_internal()
                .ok_or(BTreeError::InvalidPageFormat)?;
            parent.keys[slot - 1].clone()
        };

        let mut moved_children: Vec<PageId> = Vec::new();
        match (&mut sibling.body, &mut ctx.stack[level].node.body) {
            (NodeBody::Leaf(left), NodeBody::Leaf(right)) => {
                left.entries.append(&mut right.entries);
                left.next_page_id = right.next_page_id;
            }
            (NodeBody::Internal(left), NodeBody::Internal(right)) => {
                left.keys.push(separator);
                left.keys.append(&mut right.keys);
                moved_children = right.children.clone();
                left.children.append(&mut right.children);
            }
            _ => return Err(BTreeError::InvalidPageFormat),
        }
        ctx.stack[level].deleted = true;

        for child_id in moved_children {
            self.set_parent_pointer(ctx, child_id, sibling_id)?;
        }

        let parent = &mut ctx.stack[level - 1];
        let parent_internal = parent
            .node
            .as_internal_mut()
            .ok_or(BTreeError::InvalidPageFormat)?;
        parent_internal.remove_slot(slot);
        parent.dirty = true;
        Ok(())
    }

    /// Shrink the tree at the top: an internal root left with a single
    /// child hands the root role to that child; a leaf root left empty
    /// makes the tree empty.
    fn adjust_root(&self, ctx: &mut WriteContext<'_, K, V>) -> Result<(), BTreeError> {
        let root_id = ctx.stack[0].node.header.page_id;

        let action = match &ctx.stack[0].node.body {
            NodeBody::Internal(internal) if internal.children.len() == 1 => {
                Some(internal.children[0])
            }
            NodeBody::Leaf(leaf) if leaf.entries.is_empty() => Some(INVALID_PAGE_ID),
            _ => None,
        };

        match action {
            Some(INVALID_PAGE_ID) => {
                ctx.stack[0].deleted = true;
                ctx.deleted_pages.push(root_id);
                ctx.set_root(INVALID_PAGE_ID);
                self.update_root_record(INVALID_PAGE_ID)?;
                debug!("btree {}: tree is now empty", self.index_name());
            }
            Some(child_id) => {
                ctx.stack[0].deleted = true;
                ctx.deleted_pages.push(root_id);
                self.set_parent_pointer(ctx, child_id, INVALID_PAGE_ID)?;
                ctx.set_root(child_id);
                self.update_root_record(child_id)?;
                debug!(
                    "btree {}: root {} collapsed into child {}",
                    self.index_name(),
                    root_id,
                    child_id
                );
            }
            None => {}
        }
        Ok(())
    }
}
