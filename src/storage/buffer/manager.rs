use std::cell::Cell;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use log::debug;
use parking_lot::{Mutex, RwLockReadGuard, RwLockWriteGuard};

use crate::common::types::{FrameId, PageId, HEADER_PAGE_ID, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LRUReplacer;
use crate::storage::disk::DiskManager;
use crate::storage::page::{Page, PagePtr, PageReadLatch, PageWriteLatch};

/// Frame bookkeeping, guarded by the pool latch.
struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

impl FrameMeta {
    fn reset(&mut self) {
        self.page_id = INVALID_PAGE_ID;
        self.pin_count = 0;
        self.is_dirty = false;
    }
}

/// Everything the pool latch serializes: the page table, the free list,
/// the replacer, and per-frame metadata. Page *content* is guarded by the
/// per-page latches instead, so a thread sleeping on a page latch never
/// blocks the pool.
struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    free_list: Vec<FrameId>,
    replacer: LRUReplacer,
    frames: Vec<FrameMeta>,
}

/// Fixed-size buffer pool mapping pages to frames.
///
/// Every fetched or newly created page comes back as a [`PageGuard`] that
/// holds one pin and releases it on drop, so a page can never be evicted
/// while a caller still references it.
pub struct BufferPoolManager {
    pool_size: usize,
    pages: Vec<PagePtr>,
    state: Mutex<PoolState>,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, db_path: impl AsRef<Path>) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Ok(Self::with_disk_manager(pool_size, disk_manager))
    }

    pub fn with_disk_manager(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        let pages = (0..pool_size)
            .map(|_| PagePtr::new(parking_lot::RwLock::new(Page::new())))
            .collect();
        let frames = (0..pool_size)
            .map(|_| FrameMeta {
                page_id: INVALID_PAGE_ID,
                pin_count: 0,
                is_dirty: false,
            })
            .collect();
        // Free frames are handed out LIFO, so the most recently freed
        // frame is reused first.
        let free_list = (0..pool_size).collect();

        Self {
            pool_size,
            pages,
            state: Mutex::new(PoolState {
                page_table: HashMap::new(),
                free_list,
                replacer: LRUReplacer::new(pool_size),
                frames,
            }),
            disk_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    /// Fetch a page, reading it from disk if it is not resident.
    ///
    /// Fails with [`BufferPoolError::PoolExhausted`] when every frame is
    /// pinned; callers should treat that as a retriable resource error.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PageGuard<'_>, BufferPoolError> {
        if page_id < HEADER_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(format!(
                "cannot fetch page with invalid id {}",
                page_id
            )));
        }

        let mut state = self.state.lock();

        // Already resident: pin it and hand out a guard.
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            state.frames[frame_id].pin_count += 1;
            state.replacer.pin(frame_id);
            return Ok(self.guard_for(frame_id, page_id));
        }

        let frame_id = self.acquire_frame(&mut state)?;

        // Read the requested page into the recycled frame.
        {
            let mut page = self.pages[frame_id].write();
            page.reset();
            if let Err(e) = self.disk_manager.read_page(page_id, &mut page.data) {
                // The frame was detached above; put it back before failing.
                drop(page);
                state.frames[frame_id].reset();
                state.free_list.push(frame_id);
                return Err(e.into());
            }
        }

        let meta = &mut state.frames[frame_id];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;
        state.page_table.insert(page_id, frame_id);

        Ok(self.guard_for(frame_id, page_id))
    }

    /// Allocate a fresh page on disk and pin it in a zeroed frame.
    pub fn new_page(&self) -> Result<PageGuard<'_>, BufferPoolError> {
        let mut state = self.state.lock();
        let frame_id = self.acquire_frame(&mut state)?;

        let page_id = self.disk_manager.allocate_page();
        self.pages[frame_id].write().reset();

        let meta = &mut state.frames[frame_id];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;
        state.page_table.insert(page_id, frame_id);

        Ok(self.guard_for(frame_id, page_id))
    }

    /// Drop one pin from a page, OR-ing in the caller's dirty flag.
    ///
    /// Fails when the page is not resident or its pin count is already
    /// zero (a double unpin).
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();
        let frame_id = *state
            .page_table
            .get(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;

        let meta = &mut state.frames[frame_id];
        meta.is_dirty |= is_dirty;
        if meta.pin_count == 0 {
            return Err(BufferPoolError::PageNotPinned(page_id));
        }

        meta.pin_count -= 1;
        if meta.pin_count == 0 {
            state.replacer.unpin(frame_id);
        }

        Ok(())
    }

    /// Write a page through to disk and clear its dirty flag.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        if page_id < HEADER_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(format!(
                "cannot flush page with invalid id {}",
                page_id
            )));
        }

        let mut state = self.state.lock();
        let frame_id = *state
            .page_table
            .get(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;

        {
            let page = self.pages[frame_id].read();
            self.disk_manager.write_page(page_id, &page.data)?;
        }
        state.frames[frame_id].is_dirty = false;

        Ok(())
    }

    /// Write every resident page through to disk.
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();
        let resident: Vec<(PageId, FrameId)> =
            state.page_table.iter().map(|(&p, &f)| (p, f)).collect();

        for (page_id, frame_id) in resident {
            {
                let page = self.pages[frame_id].read();
                self.disk_manager.write_page(page_id, &page.data)?;
            }
            state.frames[frame_id].is_dirty = false;
        }

        Ok(())
    }

    /// Delete a page, deallocating it in the disk manager.
    ///
    /// Deleting a page that is not resident succeeds vacuously; deleting
    /// a pinned page fails.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();

        let frame_id = match state.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return Ok(()),
        };

        if state.frames[frame_id].pin_count > 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }

        state.replacer.pin(frame_id);
        state.page_table.remove(&page_id);
        self.pages[frame_id].write().reset();
        state.frames[frame_id].reset();
        self.disk_manager.deallocate_page(page_id);
        state.free_list.push(frame_id);

        Ok(())
    }

    /// Current pin count of a resident page, if any. Used by tests and
    /// diagnostics.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.state.lock();
        state
            .page_table
            .get(&page_id)
            .map(|&frame_id| state.frames[frame_id].pin_count)
    }

    /// Obtain a frame for a page about to become resident: the free list
    /// first (LIFO), then an LRU victim with dirty write-back. The chosen
    /// frame is detached from the page table until the caller installs a
    /// new mapping.
    fn acquire_frame(&self, state: &mut PoolState) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = state.free_list.pop() {
            return Ok(frame_id);
        }

        let frame_id = state.replacer.victim().ok_or(BufferPoolError::PoolExhausted)?;

        let (old_page_id, dirty) = {
            let meta = &state.frames[frame_id];
            (meta.page_id, meta.is_dirty)
        };

        if dirty {
            debug!("evicting dirty page {} from frame {}", old_page_id, frame_id);
            let page = self.pages[frame_id].read();
            if let Err(e) = self.disk_manager.write_page(old_page_id, &page.data) {
                // Keep the victim resident and evictable; the caller sees
                // the I/O failure instead of losing the page.
                state.replacer.unpin(frame_id);
                return Err(e.into());
            }
            drop(page);
            state.frames[frame_id].is_dirty = false;
        }

        if old_page_id != INVALID_PAGE_ID {
            state.page_table.remove(&old_page_id);
        }

        Ok(frame_id)
    }

    fn guard_for(&self, frame_id: FrameId, page_id: PageId) -> PageGuard<'_> {
        PageGuard {
            pool: self,
            page: self.pages[frame_id].clone(),
            page_id,
            dirty: Cell::new(false),
        }
    }
}

/// A pinned reference to a resident page.
///
/// Holds exactly one pin, released on drop together with the accumulated
/// dirty flag, so every fetch is paired with exactly one unpin on all
/// exit paths. Latch acquisition goes through the guard: `read`/`write`
/// for scoped access, `read_owned`/`write_owned` for latches that must
/// outlive the current borrow (latch crabbing).
pub struct PageGuard<'a> {
    pool: &'a BufferPoolManager,
    page: PagePtr,
    page_id: PageId,
    dirty: Cell<bool>,
}

impl PageGuard<'_> {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Take the page latch in shared mode.
    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read()
    }

    /// Take the page latch in exclusive mode and mark the page dirty.
    pub fn write(&self) -> RwLockWriteGuard<'_, Page> {
        self.dirty.set(true);
        self.page.write()
    }

    /// Shared latch that is independent of this guard's borrow.
    pub fn read_owned(&self) -> PageReadLatch {
        self.page.read_arc()
    }

    /// Exclusive latch that is independent of this guard's borrow.
    ///
    /// Taken during latch crabbing before knowing whether the node will
    /// change, so it does not mark the page dirty by itself; callers
    /// record modifications with [`PageGuard::mark_dirty`].
    pub fn write_owned(&self) -> PageWriteLatch {
        self.page.write_arc()
    }

    /// Record a modification without taking the latch through this guard.
    pub fn mark_dirty(&self) {
        self.dirty.set(true);
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        // The pool stays consistent even if the page was force-deleted.
        let _ = self.pool.unpin_page(self.page_id, self.dirty.get());
    }
}
