//! Mini-transactions: the unit of atomicity for one engine operation.
//!
//! A [`MiniTxn`] owns the write latches an operation takes. The first
//! modification of a page captures its before-image. [`MiniTxn::commit`]
//! logs every modified page plus a commit record as one WAL group, waits
//! for it to be durable, then stamps the pages with their LSNs. Dropping
//! an uncommitted transaction restores the before-images and forgets
//! pages it appended to the file, so a failed operation leaves the cache
//! exactly as it found it.

use tracing::{debug, warn};

use crate::buffer::{BufferPoolManager, PageWriteGuard};
use crate::common::{Error, Lsn, PageId, Result};
use crate::storage::{FreeListManager, PageAccess};

use super::wal::Wal;

struct TxnPage<'a> {
    guard: PageWriteGuard<'a>,
    /// Page contents before this transaction first changed them.
    before: Option<Box<[u8]>>,
    modified: bool,
    /// Appended to the file by this transaction.
    fresh: bool,
}

/// An in-progress operation over latched pages.
pub struct MiniTxn<'a> {
    bpm: &'a BufferPoolManager,
    wal: &'a Wal,
    max_pages: Option<u64>,
    pages: Vec<TxnPage<'a>>,
    committed: bool,
}

impl<'a> MiniTxn<'a> {
    pub fn new(bpm: &'a BufferPoolManager, wal: &'a Wal, max_pages: Option<u64>) -> Self {
        Self {
            bpm,
            wal,
            max_pages,
            pages: Vec::new(),
            committed: false,
        }
    }

    pub fn page_size(&self) -> usize {
        self.bpm.page_size()
    }

    fn position(&self, page_id: PageId) -> Option<usize> {
        self.pages.iter().position(|p| p.guard.page_id() == page_id)
    }

    /// Take the write latch on `page_id` unless already held.
    #[cfg(test)]
    fn latch(&mut self, page_id: PageId) -> Result<()> {
        self.latch_index(page_id).map(|_| ())
    }

    fn latch_index(&mut self, page_id: PageId) -> Result<usize> {
        if let Some(idx) = self.position(page_id) {
            return Ok(idx);
        }
        let guard = self.bpm.fetch_page_write(page_id)?;
        self.pages.push(TxnPage {
            guard,
            before: None,
            modified: false,
            fresh: false,
        });
        Ok(self.pages.len() - 1)
    }

    /// Whether this transaction holds the latch on `page_id`.
    #[cfg(test)]
    fn holds(&self, page_id: PageId) -> bool {
        self.position(page_id).is_some()
    }

    /// Give up the latch on an unmodified page.
    ///
    /// Returns false, keeping the latch, if the page was modified.
    pub fn release(&mut self, page_id: PageId) -> bool {
        match self.position(page_id) {
            Some(idx) if !self.pages[idx].modified => {
                self.pages.remove(idx);
                true
            }
            Some(_) => false,
            None => true,
        }
    }

    /// Number of pages modified so far.
    fn modified_count(&self) -> usize {
        self.pages.iter().filter(|p| p.modified).count()
    }

    /// Obtain a page for a new node or data page.
    ///
    /// Reuses a page from the freelist when possible, otherwise extends the
    /// file. The returned page is latched and its contents are undefined;
    /// the caller formats it.
    ///
    /// # Errors
    /// `Error::OutOfSpace` if the file is at its configured size limit or
    /// cannot grow.
    pub fn allocate_page(&mut self) -> Result<PageId> {
        if let Some(page_id) = FreeListManager::pop(self)? {
            self.page_mut(page_id)?;
            debug!(%page_id, "reusing free page");
            return Ok(page_id);
        }

        let mut meta = self.metadata()?;
        let page_id = PageId::new(meta.total_pages);
        if let Some(max) = self.max_pages {
            if meta.total_pages + 1 > max {
                return Err(Error::OutOfSpace {
                    total_pages: meta.total_pages,
                    source: None,
                });
            }
        }

        self.bpm.store().reserve(page_id)?;
        let guard = self.bpm.new_page(page_id)?;
        self.pages.push(TxnPage {
            guard,
            before: None,
            modified: true,
            fresh: true,
        });

        meta.total_pages += 1;
        self.set_metadata(&meta)?;
        debug!(%page_id, "extended file");
        Ok(page_id)
    }

    /// Return `page_id` to the freelist.
    pub fn free_page(&mut self, page_id: PageId) -> Result<()> {
        FreeListManager::push(self, page_id)?;
        debug!(%page_id, "freed page");
        Ok(())
    }

    /// Log every modified page and make the group durable.
    ///
    /// Returns the commit LSN, or `None` if nothing was modified.
    pub fn commit(mut self) -> Result<Option<Lsn>> {
        let modified: Vec<usize> = (0..self.pages.len())
            .filter(|&i| self.pages[i].modified)
            .collect();
        if modified.is_empty() {
            self.committed = true;
            return Ok(None);
        }

        let (lsns, commit_lsn) = {
            let images: Vec<(PageId, &[u8])> = modified
                .iter()
                .map(|&i| {
                    let page = &self.pages[i].guard;
                    (page.page_id(), page.as_slice())
                })
                .collect();
            self.wal.append_group(&images)?
        };
        self.wal.flush(commit_lsn)?;

        for (&i, lsn) in modified.iter().zip(lsns) {
            self.pages[i].guard.stamp(lsn);
        }
        self.committed = true;
        Ok(Some(commit_lsn))
    }

    fn entry_mut(&mut self, page_id: PageId) -> Result<&mut TxnPage<'a>> {
        let idx = self.latch_index(page_id)?;
        let entry = &mut self.pages[idx];
        if !entry.modified {
            entry.before = Some(entry.guard.to_boxed());
            entry.modified = true;
        }
        Ok(entry)
    }
}

impl PageAccess for MiniTxn<'_> {
    fn page(&mut self, page_id: PageId) -> Result<&[u8]> {
        let idx = self.latch_index(page_id)?;
        Ok(self.pages[idx].guard.as_slice())
    }

    fn page_mut(&mut self, page_id: PageId) -> Result<&mut [u8]> {
        Ok(self.entry_mut(page_id)?.guard.as_mut_slice())
    }
}

impl Drop for MiniTxn<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }

        let mut fresh = Vec::new();
        for entry in self.pages.iter_mut().rev() {
            if let Some(before) = entry.before.take() {
                entry.guard.copy_from(&before);
            }
            if entry.fresh {
                fresh.push(entry.guard.page_id());
            }
        }
        if self.modified_count() > 0 {
            debug!(pages = self.modified_count(), "rolled back mini-transaction");
        }

        self.pages.clear();
        for page_id in fresh {
            if let Err(e) = self.bpm.delete_page(page_id) {
                warn!(%page_id, error = %e, "could not drop page after rollback");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::SyncPolicy;
    use crate::storage::page::{DataPage, MetadataPage, Page};
    use crate::storage::PageStore;
    use tempfile::{tempdir, TempDir};

    const PAGE_SIZE: usize = 512;

    fn setup() -> (TempDir, BufferPoolManager, Wal) {
        let dir = tempdir().unwrap();
        let store = PageStore::open(dir.path().join("db"), PAGE_SIZE).unwrap();
        let mut meta = Page::new(PAGE_SIZE);
        MetadataPage::new(PAGE_SIZE).encode_into(meta.as_mut_slice());
        store
            .write_page(PageId::METADATA, meta.as_slice(), Lsn::ZERO)
            .unwrap();
        let mut root = Page::new(PAGE_SIZE);
        DataPage::init(root.as_mut_slice(), PageId::new(1));
        store
            .write_page(PageId::new(1), root.as_slice(), Lsn::ZERO)
            .unwrap();

        let wal = Wal::open(dir.path().join("db-wal"), PAGE_SIZE, SyncPolicy::Never).unwrap();
        (dir, BufferPoolManager::new(16, store), wal)
    }

    fn total_pages(bpm: &BufferPoolManager) -> u64 {
        let guard = bpm.fetch_page_read(PageId::METADATA).unwrap();
        MetadataPage::decode(guard.as_slice()).unwrap().total_pages
    }

    #[test]
    fn test_commit_logs_modified_pages() {
        let (_dir, bpm, wal) = setup();

        let mut txn = MiniTxn::new(&bpm, &wal, None);
        txn.latch(PageId::METADATA).unwrap();
        DataPage::new(txn.page_mut(PageId::new(1)).unwrap())
            .insert(b"abc")
            .unwrap();
        assert_eq!(txn.modified_count(), 1);
        let commit = txn.commit().unwrap().unwrap();

        assert_eq!(commit, Lsn::new(2));
        let records: Vec<_> = wal.replay().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].page_id, PageId::new(1));

        let guard = bpm.fetch_page_read(PageId::new(1)).unwrap();
        assert_eq!(guard.lsn(), Lsn::new(1));
        assert_eq!(DataPage::new(guard.as_slice()).record(0), Some(&b"abc"[..]));
    }

    #[test]
    fn test_drop_restores_before_images() {
        let (_dir, bpm, wal) = setup();

        {
            let mut txn = MiniTxn::new(&bpm, &wal, None);
            DataPage::new(txn.page_mut(PageId::new(1)).unwrap())
                .insert(b"discarded")
                .unwrap();
            let fresh = txn.allocate_page().unwrap();
            assert_eq!(fresh, PageId::new(2));
        }

        let guard = bpm.fetch_page_read(PageId::new(1)).unwrap();
        assert_eq!(DataPage::new(guard.as_slice()).live_count(), 0);
        drop(guard);
        assert_eq!(total_pages(&bpm), 2);
        assert_eq!(wal.last_lsn(), Lsn::ZERO);
    }

    #[test]
    fn test_failed_commit_rolls_back() {
        let (_dir, bpm, wal) = setup();

        let mut txn = MiniTxn::new(&bpm, &wal, None);
        DataPage::new(txn.page_mut(PageId::new(1)).unwrap())
            .insert(b"kept")
            .unwrap();
        txn.commit().unwrap();

        wal.fail_writes();
        let mut txn = MiniTxn::new(&bpm, &wal, None);
        DataPage::new(txn.page_mut(PageId::new(1)).unwrap())
            .insert(b"lost")
            .unwrap();
        let fresh = txn.allocate_page().unwrap();
        assert!(matches!(txn.commit(), Err(Error::Io(_))));

        let guard = bpm.fetch_page_read(PageId::new(1)).unwrap();
        let page = DataPage::new(guard.as_slice());
        assert_eq!(page.live_count(), 1);
        assert_eq!(page.record(0), Some(&b"kept"[..]));
        assert_eq!(guard.lsn(), Lsn::new(1));
        drop(guard);
        assert_eq!(total_pages(&bpm), 2);
        assert!(bpm.fetch_page_read(fresh).is_err());

        // The log refuses the next group before touching the file.
        let mut txn = MiniTxn::new(&bpm, &wal, None);
        txn.page_mut(PageId::new(1)).unwrap();
        assert!(matches!(txn.commit(), Err(Error::WalUnavailable)));
    }

    #[test]
    fn test_allocate_reuses_freed_pages() {
        let (_dir, bpm, wal) = setup();

        let mut txn = MiniTxn::new(&bpm, &wal, None);
        let a = txn.allocate_page().unwrap();
        DataPage::init(txn.page_mut(a).unwrap(), a);
        txn.commit().unwrap();
        assert_eq!(total_pages(&bpm), 3);

        let mut txn = MiniTxn::new(&bpm, &wal, None);
        txn.free_page(a).unwrap();
        txn.commit().unwrap();

        let mut txn = MiniTxn::new(&bpm, &wal, None);
        assert_eq!(txn.allocate_page().unwrap(), a);
        txn.commit().unwrap();
        assert_eq!(total_pages(&bpm), 3);
    }

    #[test]
    fn test_max_pages_limits_growth() {
        let (_dir, bpm, wal) = setup();

        let mut txn = MiniTxn::new(&bpm, &wal, Some(3));
        txn.allocate_page().unwrap();
        let err = txn.allocate_page().unwrap_err();
        assert!(matches!(err, Error::OutOfSpace { total_pages: 3, .. }));
        drop(txn);

        assert_eq!(total_pages(&bpm), 2);
    }

    #[test]
    fn test_release_only_unmodified() {
        let (_dir, bpm, wal) = setup();

        let mut txn = MiniTxn::new(&bpm, &wal, None);
        txn.latch(PageId::METADATA).unwrap();
        txn.page_mut(PageId::new(1)).unwrap();

        assert!(txn.release(PageId::METADATA));
        assert!(!txn.holds(PageId::METADATA));
        assert!(!txn.release(PageId::new(1)));
        assert!(txn.holds(PageId::new(1)));
    }
}
