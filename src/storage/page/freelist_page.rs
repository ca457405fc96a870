//! Freelist pages: links in the chain of reusable page IDs.
//!
//! # Layout
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 0       32    PageHeader
//! 32      8     next freelist page (0 = end of chain)
//! 40      4     count
//! 48      8*n   free page IDs
//! ```

use crate::common::PageId;

use super::page_header::{read_u32, read_u64, write_u32, write_u64, PageHeader, PageType};

const OFFSET_NEXT: usize = PageHeader::SIZE;
const OFFSET_COUNT: usize = PageHeader::SIZE + 8;
const OFFSET_IDS: usize = PageHeader::SIZE + 16;

/// Number of page IDs a freelist page of `page_size` bytes holds.
pub const fn freelist_capacity(page_size: usize) -> usize {
    (page_size - OFFSET_IDS) / 8
}

/// View over the bytes of a freelist page.
pub struct FreeListPage<B> {
    buf: B,
}

impl<B: AsRef<[u8]>> FreeListPage<B> {
    pub fn new(buf: B) -> Self {
        Self { buf }
    }

    fn data(&self) -> &[u8] {
        self.buf.as_ref()
    }

    /// Next page in the chain.
    pub fn next(&self) -> PageId {
        PageId::new(read_u64(self.data(), OFFSET_NEXT))
    }

    pub fn count(&self) -> usize {
        read_u32(self.data(), OFFSET_COUNT) as usize
    }

    pub fn capacity(&self) -> usize {
        freelist_capacity(self.data().len())
    }

    pub fn is_full(&self) -> bool {
        self.count() >= self.capacity()
    }

    /// The stored IDs, oldest first.
    pub fn ids(&self) -> Vec<PageId> {
        let count = self.count().min(self.capacity());
        (0..count)
            .map(|i| PageId::new(read_u64(self.data(), OFFSET_IDS + i * 8)))
            .collect()
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        let header = PageHeader::from_bytes(self.data());
        if header.page_type != PageType::FreeList {
            return Err(format!("expected freelist page, found {:?}", header.page_type));
        }
        if self.count() > self.capacity() {
            return Err(format!(
                "count {} exceeds capacity {}",
                self.count(),
                self.capacity()
            ));
        }
        Ok(())
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> FreeListPage<B> {
    /// Format `buf` as an empty freelist page linking to `next`.
    pub fn init(mut buf: B, page_id: PageId, next: PageId) -> Self {
        let data = buf.as_mut();
        data.fill(0);
        let mut header = PageHeader::new(page_id, PageType::FreeList);
        header.free_space_pointer = OFFSET_IDS as u32;
        header.write_to(data);
        write_u64(data, OFFSET_NEXT, next.0);
        Self { buf }
    }

    fn data_mut(&mut self) -> &mut [u8] {
        self.buf.as_mut()
    }

    fn set_count(&mut self, count: usize) {
        write_u32(self.data_mut(), OFFSET_COUNT, count as u32);
        let fsp = (OFFSET_IDS + count * 8) as u32;
        write_u32(self.data_mut(), PageHeader::OFFSET_FREE_SPACE, fsp);
    }

    /// Append an ID. Returns `false` if the page is full.
    pub fn push(&mut self, page_id: PageId) -> bool {
        let count = self.count();
        if count >= self.capacity() {
            return false;
        }
        write_u64(self.data_mut(), OFFSET_IDS + count * 8, page_id.0);
        self.set_count(count + 1);
        true
    }

    /// Remove the most recently pushed ID.
    pub fn pop(&mut self) -> Option<PageId> {
        let count = self.count().min(self.capacity());
        if count == 0 {
            return None;
        }
        let id = PageId::new(read_u64(self.data(), OFFSET_IDS + (count - 1) * 8));
        self.set_count(count - 1);
        Some(id)
    }
}
