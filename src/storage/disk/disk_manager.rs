use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};

use log::warn;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{PageId, HEADER_PAGE_ID, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
}

/// DiskManager is responsible for handling the actual disk I/O operations.
///
/// Pages are fixed-size blocks addressed by `page_id * PAGE_SIZE`; page 0
/// is reserved for the header page. Deallocated page IDs are recycled by
/// later allocations.
pub struct DiskManager {
    db_file: Mutex<File>,
    next_page_id: AtomicI32,
    free_pages: Mutex<Vec<PageId>>,
    num_reads: AtomicU64,
    num_writes: AtomicU64,
}

impl DiskManager {
    /// Create a new DiskManager with the specified database file
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path)?;

        // The header page always occupies slot 0, so fresh files start
        // allocating at 1.
        let file_pages = (file.metadata()?.len() / PAGE_SIZE as u64) as PageId;
        let next_page_id = file_pages.max(1);

        Ok(Self {
            db_file: Mutex::new(file),
            next_page_id: AtomicI32::new(next_page_id),
            free_pages: Mutex::new(Vec::new()),
            num_reads: AtomicU64::new(0),
            num_writes: AtomicU64::new(0),
        })
    }

    /// Read a page from disk into the supplied buffer.
    ///
    /// Reading a page that has never been written yields a zeroed buffer,
    /// so freshly allocated pages come back blank after reopen.
    pub fn read_page(
        &self,
        page_id: PageId,
        data: &mut [u8; PAGE_SIZE],
    ) -> Result<(), DiskManagerError> {
        if page_id < HEADER_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = self.page_offset(page_id);
        let mut file = self.db_file.lock();

        let file_size = file.metadata()?.len();
        if offset >= file_size {
            data.fill(0);
            self.num_reads.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(data)?;
        self.num_reads.fetch_add(1, Ordering::Relaxed);

        Ok(())
    }

    /// Write a page buffer to disk
    pub fn write_page(
        &self,
        page_id: PageId,
        data: &[u8; PAGE_SIZE],
    ) -> Result<(), DiskManagerError> {
        if page_id < HEADER_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = self.page_offset(page_id);
        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.flush()?;
        self.num_writes.fetch_add(1, Ordering::Relaxed);

        Ok(())
    }

    /// Allocate a new page on disk and return its ID, reusing deallocated
    /// IDs when available.
    pub fn allocate_page(&self) -> PageId {
        if let Some(page_id) = self.free_pages.lock().pop() {
            return page_id;
        }
        self.next_page_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Return a page ID to the allocator.
    pub fn deallocate_page(&self, page_id: PageId) {
        if page_id <= HEADER_PAGE_ID {
            warn!("ignoring deallocation of reserved page {}", page_id);
            return;
        }
        self.free_pages.lock().push(page_id);
    }

    /// Number of page reads served so far
    pub fn num_reads(&self) -> u64 {
        self.num_reads.load(Ordering::Relaxed)
    }

    /// Number of page writes performed so far
    pub fn num_writes(&self) -> u64 {
        self.num_writes.load(Ordering::Relaxed)
    }

    /// Calculate the offset of a page in the file
    fn page_offset(&self, page_id: PageId) -> u64 {
        page_id as u64 * PAGE_SIZE as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_write_then_read_roundtrip() {
        let file = NamedTempFile::new().unwrap();
        let disk = DiskManager::new(file.path()).unwrap();

        let page_id = disk.allocate_page();
        let mut data = [0u8; PAGE_SIZE];
        data[0..4].copy_from_slice(b"abcd");
        disk.write_page(page_id, &data).unwrap();

        let mut read_back = [0u8; PAGE_SIZE];
        disk.read_page(page_id, &mut read_back).unwrap();
        assert_eq!(&read_back[0..4], b"abcd");
        assert_eq!(disk.num_writes(), 1);
    }

    #[test]
    fn test_read_of_unwritten_page_is_zeroed() {
        let file = NamedTempFile::new().unwrap();
        let disk = DiskManager::new(file.path()).unwrap();

        let mut data = [1u8; PAGE_SIZE];
        disk.read_page(7, &mut data).unwrap();
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_deallocated_ids_are_recycled() {
        let file = NamedTempFile::new().unwrap();
        let disk = DiskManager::new(file.path()).unwrap();

        let first = disk.allocate_page();
        let second = disk.allocate_page();
        assert_ne!(first, second);

        disk.deallocate_page(first);
        assert_eq!(disk.allocate_page(), first);
    }

    #[test]
    fn test_negative_page_id_rejected() {
        let file = NamedTempFile::new().unwrap();
        let disk = DiskManager::new(file.path()).unwrap();

        let mut data = [0u8; PAGE_SIZE];
        assert!(disk.read_page(-1, &mut data).is_err());
        assert!(disk.write_page(-1, &data).is_err());
    }
}
