//! Latched page handles returned by the buffer pool.
//!
//! A guard pins its frame and holds the page latch for as long as it lives.
//! Dropping it releases the latch and unpins the frame in one step, so a
//! page can never be evicted while someone still reads or edits it.

use std::ops::{Deref, DerefMut};

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::{FrameId, Lsn, PageId, Result};
use crate::storage::page::{Page, PageBody};

use super::buffer_pool_manager::BufferPoolManager;

/// Shared access to a cached page.
pub struct PageReadGuard<'a> {
    bpm: &'a BufferPoolManager,
    frame_id: FrameId,
    page_id: PageId,
    lock: RwLockReadGuard<'a, Page>,
}

impl<'a> PageReadGuard<'a> {
    pub(crate) fn new(
        bpm: &'a BufferPoolManager,
        frame_id: FrameId,
        page_id: PageId,
        lock: RwLockReadGuard<'a, Page>,
    ) -> Self {
        Self {
            bpm,
            frame_id,
            page_id,
            lock,
        }
    }

    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    #[cfg(test)]
    pub(crate) fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Decode the page according to its type tag.
    pub fn body(&self) -> Result<PageBody> {
        PageBody::decode(self.page_id, self.lock.as_slice())
    }
}

impl Deref for PageReadGuard<'_> {
    type Target = Page;

    #[inline]
    fn deref(&self) -> &Page {
        &self.lock
    }
}

impl std::fmt::Debug for PageReadGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageReadGuard")
            .field("frame_id", &self.frame_id)
            .field("page_id", &self.page_id)
            .finish_non_exhaustive()
    }
}

impl Drop for PageReadGuard<'_> {
    fn drop(&mut self) {
        self.bpm.unpin_page_internal(self.frame_id, false);
    }
}

/// Exclusive access to a cached page.
///
/// Any mutable borrow marks the frame dirty when the guard drops, before
/// the latch is released. Pages only ever change inside a mini-transaction,
/// which stamps the commit LSN through [`PageWriteGuard::stamp`].
pub struct PageWriteGuard<'a> {
    bpm: &'a BufferPoolManager,
    frame_id: FrameId,
    page_id: PageId,
    dirty: bool,
    lock: RwLockWriteGuard<'a, Page>,
}

impl<'a> PageWriteGuard<'a> {
    pub(crate) fn new(
        bpm: &'a BufferPoolManager,
        frame_id: FrameId,
        page_id: PageId,
        lock: RwLockWriteGuard<'a, Page>,
    ) -> Self {
        Self {
            bpm,
            frame_id,
            page_id,
            dirty: false,
            lock,
        }
    }

    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    #[cfg(test)]
    pub(crate) fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Record the LSN of the log group that produced this image.
    pub fn stamp(&mut self, lsn: Lsn) {
        debug_assert!(lsn >= self.lock.lsn(), "page LSN moved backwards");
        self.dirty = true;
        self.lock.set_lsn(lsn);
    }
}

impl Deref for PageWriteGuard<'_> {
    type Target = Page;

    #[inline]
    fn deref(&self) -> &Page {
        &self.lock
    }
}

impl DerefMut for PageWriteGuard<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Page {
        self.dirty = true;
        &mut self.lock
    }
}

impl std::fmt::Debug for PageWriteGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageWriteGuard")
            .field("frame_id", &self.frame_id)
            .field("page_id", &self.page_id)
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}

impl Drop for PageWriteGuard<'_> {
    fn drop(&mut self) {
        self.bpm.unpin_page_internal(self.frame_id, self.dirty);
    }
}
