pub mod error;
pub mod node;
pub mod serialization;
pub mod tree;

pub use error::BTreeError;
pub use node::{BTreeNode, InternalNode, LeafNode, NodeBody, WriteOp};
pub use serialization::{deserialize_node, estimated_max_sizes, serialize_node};
pub use tree::{BPlusTree, TreeIterator};
