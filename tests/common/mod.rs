use std::sync::Arc;

use anyhow::Result;
use tempfile::NamedTempFile;

use stratumdb::index::btree::BPlusTree;
use stratumdb::storage::buffer::BufferPoolManager;

// Route log output through the test harness when RUST_LOG is set
#[allow(dead_code)]
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a buffer pool manager backed by a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(pool_size: usize) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, path)?);
    Ok((buffer_pool, file))
}

// Create a small-fanout integer tree so structural tests stay readable
#[allow(dead_code)]
pub fn create_test_tree(
    pool_size: usize,
    leaf_max: usize,
    internal_max: usize,
) -> Result<(BPlusTree<i32, u64>, Arc<BufferPoolManager>, NamedTempFile)> {
    let (buffer_pool, file) = create_test_buffer_pool(pool_size)?;
    let tree = BPlusTree::new("test_index", buffer_pool.clone(), leaf_max, internal_max)?;
    Ok((tree, buffer_pool, file))
}

// Collect every (key, value) pair by scanning the leaf chain
#[allow(dead_code)]
pub fn collect_tree(tree: &BPlusTree<i32, u64>) -> Result<Vec<(i32, u64)>> {
    let mut entries = Vec::new();
    for item in tree.iter()? {
        entries.push(item?);
    }
    Ok(entries)
}
