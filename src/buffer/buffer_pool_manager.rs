//! Buffer Pool Manager - the core page caching layer.
//!
//! The [`BufferPoolManager`] provides:
//! - Page caching between disk and memory
//! - Pin-based reference counting
//! - Dirty page write-back on eviction and flush
//! - Page latches through its guards

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use parking_lot::{Mutex, MutexGuard};
use tracing::trace;

use crate::buffer::replacer::FifoReplacer;
use crate::buffer::{BufferPoolStats, Frame, PageReadGuard, PageWriteGuard};
use crate::common::{Error, FrameId, PageId, Result};
use crate::storage::PageStore;

/// Bookkeeping guarded by the pool lock.
struct PoolInner {
    /// Maps page IDs to frame IDs.
    page_table: HashMap<PageId, FrameId>,

    /// Stack of free frame IDs (LIFO for cache locality).
    free_list: Vec<FrameId>,

    /// Eviction policy for selecting victim frames.
    replacer: FifoReplacer,
}

/// Manages a pool of buffer frames for caching disk pages.
///
/// # Architecture
/// ```text
/// ┌─────────────────────────────────────────────────────────────┐
/// │                    BufferPoolManager                        │
/// │  ┌───────────── inner: Mutex ─────────────┐                 │
/// │  │ page_table   free_list   replacer      │                 │
/// │  └────────────────────────────────────────┘                 │
/// │  ┌───────────────────────────────────┐  ┌──────────────┐    │
/// │  │        frames: Vec<Frame>         │  │  PageStore   │    │
/// │  │  [Frame0] [Frame1] [Frame2] ...   │  │ (checksums)  │    │
/// │  └───────────────────────────────────┘  └──────────────┘    │
/// └─────────────────────────────────────────────────────────────┘
/// ```
///
/// # Thread Safety
/// - `inner`: one `Mutex` over the page table, free list and replacer, so
///   that lookup, pin and eviction are a single atomic step. Misses read
///   the page while holding it.
/// - `frames`: no lock; fixed size, each Frame has its own latch
/// - `stats`: no lock; atomic counters
///
/// Page latches are taken after the pool lock is released; a pinned frame
/// is never evicted, so the latch always belongs to the requested page.
pub struct BufferPoolManager {
    frames: Vec<Frame>,
    inner: Mutex<PoolInner>,
    store: PageStore,
    stats: BufferPoolStats,
}

impl BufferPoolManager {
    /// Create a new buffer pool manager over `store`.
    ///
    /// # Panics
    /// Panics if `pool_size` is 0.
    pub fn new(pool_size: usize, store: PageStore) -> Self {
        assert!(pool_size > 0, "pool_size must be > 0");

        let page_size = store.page_size();
        let frames: Vec<Frame> = (0..pool_size).map(|_| Frame::new(page_size)).collect();
        let free_list: Vec<FrameId> = (0..pool_size).rev().map(FrameId::new).collect();

        Self {
            frames,
            inner: Mutex::new(PoolInner {
                page_table: HashMap::new(),
                free_list,
                replacer: FifoReplacer::new(),
            }),
            store,
            stats: BufferPoolStats::new(),
        }
    }

    /// The page store underneath the pool.
    pub fn store(&self) -> &PageStore {
        &self.store
    }

    pub fn page_size(&self) -> usize {
        self.store.page_size()
    }

    // ========================================================================
    // Public API: Fetch pages
    // ========================================================================

    /// Fetch a page for reading (shared latch).
    ///
    /// # Errors
    /// - `Error::OutOfRange` if the page doesn't exist on disk
    /// - `Error::ChecksumMismatch` if the page fails verification
    /// - `Error::NoFreeFrames` if all frames are pinned
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<PageReadGuard<'_>> {
        let frame_id = self.fetch_page_internal(page_id)?;
        let lock = self.frames[frame_id.0].page();

        Ok(PageReadGuard::new(self, frame_id, page_id, lock))
    }

    /// Fetch a page for reading without waiting for its latch.
    ///
    /// Returns `Ok(None)` if a writer holds the latch.
    pub fn try_fetch_page_read(&self, page_id: PageId) -> Result<Option<PageReadGuard<'_>>> {
        let frame_id = self.fetch_page_internal(page_id)?;
        match self.frames[frame_id.0].try_page() {
            Some(lock) => Ok(Some(PageReadGuard::new(self, frame_id, page_id, lock))),
            None => {
                self.unpin_page_internal(frame_id, false);
                Ok(None)
            }
        }
    }

    /// Fetch a page for writing (exclusive latch).
    ///
    /// # Errors
    /// Same as [`fetch_page_read`](Self::fetch_page_read).
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<PageWriteGuard<'_>> {
        let frame_id = self.fetch_page_internal(page_id)?;
        let lock = self.frames[frame_id.0].page_mut();

        Ok(PageWriteGuard::new(self, frame_id, page_id, lock))
    }

    // ========================================================================
    // Public API: Create and delete pages
    // ========================================================================

    /// Register a zeroed page for `page_id` without reading the disk.
    ///
    /// Used for pages appended to the file; the caller formats the page
    /// through the returned guard.
    ///
    /// # Errors
    /// - `Error::NoFreeFrames` if all frames are pinned
    pub fn new_page(&self, page_id: PageId) -> Result<PageWriteGuard<'_>> {
        let frame_id = {
            let mut inner = self.inner.lock();

            let frame_id = match inner.page_table.get(&page_id) {
                Some(&fid) => fid,
                None => {
                    let fid = self.get_free_frame(&mut inner)?;
                    self.frames[fid.0].set_page_id(Some(page_id));
                    inner.page_table.insert(page_id, fid);
                    fid
                }
            };

            self.frames[frame_id.0].pin();
            inner.replacer.record_access(frame_id);
            inner.replacer.set_evictable(frame_id, false);
            frame_id
        };

        let mut guard =
            PageWriteGuard::new(self, frame_id, page_id, self.frames[frame_id.0].page_mut());
        guard.reset();
        Ok(guard)
    }

    /// Drop a page from the buffer pool without writing it back.
    ///
    /// # Errors
    /// - `Error::PagePinned` if the page is still in use
    pub fn delete_page(&self, page_id: PageId) -> Result<()> {
        let mut inner = self.inner.lock();

        let frame_id = match inner.page_table.get(&page_id) {
            Some(&fid) => fid,
            None => return Ok(()),
        };

        let frame = &self.frames[frame_id.0];
        if frame.is_pinned() {
            return Err(Error::PagePinned(page_id));
        }

        inner.page_table.remove(&page_id);
        inner.replacer.remove(frame_id);
        inner.free_list.push(frame_id);
        frame.detach();

        Ok(())
    }

    // ========================================================================
    // Public API: Flush pages
    // ========================================================================

    /// Write all dirty pages back to disk.
    ///
    /// Does not sync the file; see [`PageStore::sync`].
    pub fn flush_all_pages(&self) -> Result<()> {
        let pages: Vec<(PageId, FrameId)> = {
            let inner = self.inner.lock();
            inner.page_table.iter().map(|(&pid, &fid)| (pid, fid)).collect()
        };

        for (page_id, frame_id) in pages {
            self.flush_frame(frame_id, page_id)?;
        }

        Ok(())
    }

    // ========================================================================
    // Public API: Stats and info
    // ========================================================================

    pub fn stats(&self) -> &BufferPoolStats {
        &self.stats
    }

    /// Frames holding no page.
    #[cfg(test)]
    fn free_frame_count(&self) -> usize {
        self.inner.lock().free_list.len()
    }

    /// Get the number of pages in the buffer pool.
    pub fn page_count(&self) -> usize {
        self.inner.lock().page_table.len()
    }

    // ========================================================================
    // Internal: Called by PageGuard on drop
    // ========================================================================

    /// Unpin a page. Called by PageReadGuard/PageWriteGuard on drop.
    ///
    /// Runs under the pool lock so a concurrent fetch cannot pin the frame
    /// between the unpin and the replacer update.
    pub(crate) fn unpin_page_internal(&self, frame_id: FrameId, is_dirty: bool) {
        let frame = &self.frames[frame_id.0];

        if is_dirty {
            frame.mark_dirty();
        }

        let mut inner = self.inner.lock();
        if frame.unpin() == 0 {
            inner.replacer.set_evictable(frame_id, true);
        }
    }

    // ========================================================================
    // Internal: Core fetch logic
    // ========================================================================

    /// Fetch a page into the buffer pool and pin it, returning its frame ID.
    fn fetch_page_internal(&self, page_id: PageId) -> Result<FrameId> {
        let mut inner = self.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            self.frames[frame_id.0].pin();
            inner.replacer.record_access(frame_id);
            inner.replacer.set_evictable(frame_id, false);
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(frame_id);
        }

        self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);

        let frame_id = self.get_free_frame(&mut inner)?;
        let frame = &self.frames[frame_id.0];

        // The frame is off every list, so nobody else can latch it.
        let loaded = {
            let mut page = frame.page_mut();
            self.store.read_page(page_id, page.as_mut_slice())
        };
        if let Err(e) = loaded {
            inner.free_list.push(frame_id);
            return Err(e);
        }
        self.stats.pages_read.fetch_add(1, Ordering::Relaxed);

        frame.set_page_id(Some(page_id));
        frame.pin();
        inner.page_table.insert(page_id, frame_id);
        inner.replacer.record_access(frame_id);
        inner.replacer.set_evictable(frame_id, false);

        Ok(frame_id)
    }

    // ========================================================================
    // Internal: Frame allocation and eviction
    // ========================================================================

    /// Get a free frame, evicting if necessary.
    fn get_free_frame(&self, inner: &mut MutexGuard<'_, PoolInner>) -> Result<FrameId> {
        if let Some(frame_id) = inner.free_list.pop() {
            return Ok(frame_id);
        }

        self.evict_page(inner)
    }

    /// Evict a page and return its now-empty frame.
    fn evict_page(&self, inner: &mut MutexGuard<'_, PoolInner>) -> Result<FrameId> {
        let frame_id = inner.replacer.evict().ok_or(Error::NoFreeFrames)?;
        let frame = &self.frames[frame_id.0];

        if let Some(old_page_id) = frame.page_id() {
            if let Err(e) = self.flush_frame(frame_id, old_page_id) {
                // Keep the page cached; it is still dirty.
                inner.replacer.record_access(frame_id);
                inner.replacer.set_evictable(frame_id, true);
                return Err(e);
            }
            inner.page_table.remove(&old_page_id);
            trace!(page_id = %old_page_id, %frame_id, "evicted page");
        }

        self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        frame.detach();

        Ok(frame_id)
    }

    /// Write a frame back to disk if it still holds `page_id` and is dirty.
    fn flush_frame(&self, frame_id: FrameId, page_id: PageId) -> Result<()> {
        let frame = &self.frames[frame_id.0];

        let page = frame.page();
        if frame.page_id() != Some(page_id) || !frame.is_dirty() {
            return Ok(());
        }

        self.store.write_page(page_id, page.as_slice(), page.lsn())?;
        frame.clear_dirty();
        self.stats.pages_written.fetch_add(1, Ordering::Relaxed);

        Ok(())
    }
}
