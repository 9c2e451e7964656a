mod base;
#[cfg(test)]
mod tests;

pub use base::{BTreeNode, InternalNode, LeafNode, NodeBody, NodeHeader, WriteOp};
