//! Reclaimable page tracking.
//!
//! Free page IDs live in a chain of freelist pages rooted at the metadata
//! page's `first_free_list`. The head page is popped from and pushed to
//! (LIFO). An empty head page is itself handed out, and a page being freed
//! while the head is full becomes the new head, so maintaining the chain
//! never needs a page of its own.

use tracing::debug;

use crate::common::{Error, PageId, Result};
use crate::storage::page::{FreeListPage, MetadataPage, PageBody};

/// Page access within an operation that is logged as a unit.
///
/// Implemented by the mini-transaction; pages are latched on first access.
pub trait PageAccess {
    /// Shared view of a page.
    fn page(&mut self, page_id: PageId) -> Result<&[u8]>;

    /// Mutable view of a page; the page becomes part of the logged group.
    fn page_mut(&mut self, page_id: PageId) -> Result<&mut [u8]>;

    /// Decode the metadata page.
    fn metadata(&mut self) -> Result<MetadataPage> {
        let data = self.page(PageId::METADATA)?;
        MetadataPage::decode(data).map_err(|reason| Error::corrupted(PageId::METADATA, reason))
    }

    /// Overwrite the metadata page.
    fn set_metadata(&mut self, meta: &MetadataPage) -> Result<()> {
        meta.encode_into(self.page_mut(PageId::METADATA)?);
        Ok(())
    }
}

/// Pops and pushes page IDs on the freelist chain.
pub struct FreeListManager;

impl FreeListManager {
    /// Take a reusable page ID, or `None` if the freelist is empty.
    pub fn pop<A: PageAccess>(txn: &mut A) -> Result<Option<PageId>> {
        let mut meta = txn.metadata()?;
        let head = meta.first_free_list;
        if head.is_none() {
            return Ok(None);
        }

        let (count, next) = {
            let page = FreeListPage::new(txn.page(head)?);
            page.validate()
                .map_err(|reason| Error::corrupted(head, reason))?;
            (page.count(), page.next())
        };

        if count > 0 {
            let mut page = FreeListPage::new(txn.page_mut(head)?);
            return Ok(page.pop());
        }

        // Exhausted head page: hand it out and advance the chain.
        meta.first_free_list = next;
        txn.set_metadata(&meta)?;
        debug!(page_id = %head, %next, "reusing empty freelist page");
        Ok(Some(head))
    }

    /// Return `page_id` to the freelist.
    pub fn push<A: PageAccess>(txn: &mut A, page_id: PageId) -> Result<()> {
        let mut meta = txn.metadata()?;
        let head = meta.first_free_list;

        if !head.is_none() {
            let full = {
                let page = FreeListPage::new(txn.page(head)?);
                page.validate()
                    .map_err(|reason| Error::corrupted(head, reason))?;
                page.is_full()
            };
            if !full {
                FreeListPage::new(txn.page_mut(head)?).push(page_id);
                return Ok(());
            }
        }

        FreeListPage::init(txn.page_mut(page_id)?, page_id, head);
        meta.first_free_list = page_id;
        txn.set_metadata(&meta)?;
        debug!(%page_id, previous = %head, "new freelist head");
        Ok(())
    }

    /// Every free page ID in the chain, freelist pages included.
    pub fn collect<A: PageAccess>(txn: &mut A) -> Result<Vec<PageId>> {
        let meta = txn.metadata()?;
        let mut ids = Vec::new();
        let mut current = meta.first_free_list;

        while !current.is_none() {
            if ids.len() as u64 > meta.total_pages {
                return Err(Error::corrupted(current, "freelist chain has a cycle"));
            }
            match PageBody::decode(current, txn.page(current)?)? {
                PageBody::FreeList { next, ids: chained } => {
                    ids.push(current);
                    ids.extend(chained);
                    current = next;
                }
                other => {
                    return Err(Error::corrupted(
                        current,
                        format!("freelist chain reaches a {:?} page", other.page_type()),
                    ))
                }
            }
        }
        Ok(ids)
    }
}
