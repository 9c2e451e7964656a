use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

use super::*;
use crate::common::types::{PageId, PAGE_SIZE};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{BTreeNode, NodeBody};
use crate::storage::page::Page;

/// Serialize a node into a page buffer.
pub fn serialize_node<K, V>(node: &BTreeNode<K, V>, page: &mut Page) -> Result<(), BTreeError>
where
    K: Serialize,
    V: Serialize,
{
    page.data.fill(0);

    LittleEndian::write_u32(
        &mut page.data[MAX_SIZE_OFFSET..MAX_SIZE_OFFSET + 4],
        node.header.max_size as u32,
    );
    LittleEndian::write_i32(
        &mut page.data[PARENT_OFFSET..PARENT_OFFSET + 4],
        node.header.parent_page_id,
    );
    LittleEndian::write_i32(
        &mut page.data[PAGE_ID_OFFSET..PAGE_ID_OFFSET + 4],
        node.header.page_id,
    );

    match &node.body {
        NodeBody::Leaf(leaf) => {
            page.data[0] = PAGE_TYPE_LEAF;
            LittleEndian::write_u32(
                &mut page.data[SIZE_OFFSET..SIZE_OFFSET + 4],
                leaf.entries.len() as u32,
            );
            LittleEndian::write_i32(
                &mut page.data[NEXT_OFFSET..NEXT_OFFSET + 4],
                leaf.next_page_id,
            );

            let mut offset = LEAF_HEADER_SIZE;
            for (key, value) in &leaf.entries {
                offset = write_blob(page, offset, key)?;
                offset = write_blob(page, offset, value)?;
            }
        }
        NodeBody::Internal(internal) => {
            if internal.children.is_empty() {
                return Err(BTreeError::InvalidPageFormat);
            }
            page.data[0] = PAGE_TYPE_INTERNAL;
            LittleEndian::write_u32(
                &mut page.data[SIZE_OFFSET..SIZE_OFFSET + 4],
                internal.children.len() as u32,
            );

            // The leftmost child has no routing key of its own; the
            // remaining children are written as (key, child) pairs.
            let mut offset = INTERNAL_HEADER_SIZE;
            offset = write_child(page, offset, internal.children[0])?;
            for (key, child) in internal.keys.iter().zip(internal.children.iter().skip(1)) {
                offset = write_blob(page, offset, key)?;
                offset = write_child(page, offset, *child)?;
            }
        }
    }

    Ok(())
}

/// Rewrite only the parent pointer of an already serialized node. Used
/// when a split or merge adopts children whose pages are otherwise
/// untouched.
pub fn write_parent_pointer(page: &mut Page, parent_page_id: PageId) {
    LittleEndian::write_i32(&mut page.data[PARENT_OFFSET..PARENT_OFFSET + 4], parent_page_id);
}

fn write_blob<T: Serialize>(page: &mut Page, offset: usize, value: &T) -> Result<usize, BTreeError> {
    let bytes = bincode::serialize(value)
        .map_err(|e| BTreeError::SerializationError(e.to_string()))?;

    if bytes.len() > u16::MAX as usize || offset + LEN_PREFIX_SIZE + bytes.len() > PAGE_SIZE {
        return Err(BTreeError::NodeTooLarge);
    }

    LittleEndian::write_u16(
        &mut page.data[offset..offset + LEN_PREFIX_SIZE],
        bytes.len() as u16,
    );
    let offset = offset + LEN_PREFIX_SIZE;
    page.data[offset..offset + bytes.len()].copy_from_slice(&bytes);

    Ok(offset + bytes.len())
}

fn write_child(page: &mut Page, offset: usize, child: PageId) -> Result<usize, BTreeError> {
    if offset + CHILD_SIZE > PAGE_SIZE {
        return Err(BTreeError::NodeTooLarge);
    }
    LittleEndian::write_i32(&mut page.data[offset..offset + CHILD_SIZE], child);
    Ok(offset + CHILD_SIZE)
}
