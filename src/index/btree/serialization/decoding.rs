use byteorder::{ByteOrder, LittleEndian};
use serde::de::DeserializeOwned;

use super::*;
use crate::common::types::{PageId, PAGE_SIZE};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{BTreeNode, InternalNode, LeafNode, NodeBody, NodeHeader};
use crate::storage::page::Page;

/// Deserialize a node from a page buffer.
pub fn deserialize_node<K, V>(page: &Page) -> Result<BTreeNode<K, V>, BTreeError>
where
    K: DeserializeOwned,
    V: DeserializeOwned,
{
    let size = LittleEndian::read_u32(&page.data[SIZE_OFFSET..SIZE_OFFSET + 4]) as usize;
    let max_size = LittleEndian::read_u32(&page.data[MAX_SIZE_OFFSET..MAX_SIZE_OFFSET + 4]) as usize;
    let parent_page_id = LittleEndian::read_i32(&page.data[PARENT_OFFSET..PARENT_OFFSET + 4]);
    let page_id = LittleEndian::read_i32(&page.data[PAGE_ID_OFFSET..PAGE_ID_OFFSET + 4]);

    let header = NodeHeader {
        page_id,
        parent_page_id,
        max_size,
    };

    let body = match page.data[0] {
        PAGE_TYPE_LEAF => {
            let next_page_id = LittleEndian::read_i32(&page.data[NEXT_OFFSET..NEXT_OFFSET + 4]);
            let mut entries = Vec::with_capacity(size);
            let mut offset = LEAF_HEADER_SIZE;
            for _ in 0..size {
                let (key, new_offset) = read_blob::<K>(page, offset)?;
                let (value, new_offset) = read_blob::<V>(page, new_offset)?;
                entries.push((key, value));
                offset = new_offset;
            }
            NodeBody::Leaf(LeafNode {
                entries,
                next_page_id,
            })
        }
        PAGE_TYPE_INTERNAL => {
            if size == 0 {
                return Err(BTreeError::InvalidPageFormat);
            }
            let mut keys = Vec::with_capacity(size - 1);
            let mut children = Vec::with_capacity(size);
            let mut offset = INTERNAL_HEADER_SIZE;

            let (first_child, new_offset) = read_child(page, offset)?;
            children.push(first_child);
            offset = new_offset;

            for _ in 1..size {
                let (key, new_offset) = read_blob::<K>(page, offset)?;
                let (child, new_offset) = read_child(page, new_offset)?;
                keys.push(key);
                children.push(child);
                offset = new_offset;
            }
            NodeBody::Internal(InternalNode { keys, children })
        }
        _ => return Err(BTreeError::InvalidPageFormat),
    };

    Ok(BTreeNode { header, body })
}

fn read_blob<T: DeserializeOwned>(page: &Page, offset: usize) -> Result<(T, usize), BTreeError> {
    if offset + LEN_PREFIX_SIZE > PAGE_SIZE {
        return Err(BTreeError::InvalidPageFormat);
    }
    let len = LittleEndian::read_u16(&page.data[offset..offset + LEN_PREFIX_SIZE]) as usize;
    let offset = offset + LEN_PREFIX_SIZE;

    if offset + len > PAGE_SIZE {
        return Err(BTreeError::InvalidPageFormat);
    }
    let value = bincode::deserialize(&page.data[offset..offset + len])
        .map_err(|e| BTreeError::DeserializationError(e.to_string()))?;

    Ok((value, offset + len))
}

fn read_child(page: &Page, offset: usize) -> Result<(PageId, usize), BTreeError> {
    if offset + CHILD_SIZE > PAGE_SIZE {
        return Err(BTreeError::InvalidPageFormat);
    }
    let child = LittleEndian::read_i32(&page.data[offset..offset + CHILD_SIZE]);
    Ok((child, offset + CHILD_SIZE))
}
