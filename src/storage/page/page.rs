//! Page - the fundamental unit of storage.
//!
//! A [`Page`] is a raw byte buffer of the database's page size that serves
//! as the unit of I/O between disk and memory. Pages are stored in
//! [`Frame`](crate::buffer::Frame)s within the buffer pool.

use crate::common::Lsn;

use super::page_header::PageHeader;

/// A page of data.
///
/// The size is chosen when the database is created and never changes, so
/// the buffer is allocated once per frame and reused.
///
/// # Clone Implementation
/// `Page` does NOT implement `Clone` in production code: copying a page
/// should be explicit (see [`Page::to_boxed`]). A `#[cfg(test)]` Clone is
/// provided for tests.
///
/// # Example
/// ```
/// use pagedb::storage::page::Page;
///
/// let mut page = Page::new(4096);
/// page.as_mut_slice()[0] = 0xFF;
/// assert_eq!(page.as_slice()[0], 0xFF);
/// assert_eq!(page.size(), 4096);
/// ```
pub struct Page {
    data: Box<[u8]>,
}

impl Page {
    /// Create a new zeroed page.
    #[inline]
    pub fn new(page_size: usize) -> Self {
        Self {
            data: vec![0u8; page_size].into_boxed_slice(),
        }
    }

    /// Get immutable slice of page data.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Get mutable slice of page data.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Zero out the entire page.
    pub fn reset(&mut self) {
        self.data.fill(0);
    }

    /// Size of this page in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Copy of the page bytes.
    pub fn to_boxed(&self) -> Box<[u8]> {
        self.data.clone()
    }

    /// Overwrite the page with `bytes`.
    ///
    /// # Panics
    /// Panics if `bytes` is not exactly one page long.
    pub fn copy_from(&mut self, bytes: &[u8]) {
        self.data.copy_from_slice(bytes);
    }

    /// Read the page header.
    pub fn header(&self) -> PageHeader {
        PageHeader::from_bytes(&self.data)
    }

    /// Write a page header.
    pub fn set_header(&mut self, header: &PageHeader) {
        header.write_to(&mut self.data);
    }

    /// LSN of the last logged change to this page.
    pub fn lsn(&self) -> Lsn {
        self.header().lsn
    }

    /// Stamp a new LSN into the header without touching the checksum.
    pub fn set_lsn(&mut self, lsn: Lsn) {
        stamp_lsn(&mut self.data, lsn);
    }

    /// Compute and store checksum in the header.
    ///
    /// Call this after all modifications to the page are complete.
    pub fn update_checksum(&mut self) {
        stamp_checksum(&mut self.data);
    }

    /// Verify the page checksum is valid.
    pub fn verify_checksum(&self) -> bool {
        self.header().verify_checksum(&self.data)
    }
}

/// Store `lsn` in the header field of `data`.
pub(crate) fn stamp_lsn(data: &mut [u8], lsn: Lsn) {
    super::page_header::write_u64(data, PageHeader::OFFSET_LSN, lsn.as_u64());
}

/// Compute the checksum of `data` and store it in the header field.
pub(crate) fn stamp_checksum(data: &mut [u8]) {
    let checksum = PageHeader::compute_checksum(data);
    super::page_header::write_u32(data, PageHeader::OFFSET_CHECKSUM, checksum);
}

// Clone only available in tests - forces explicit copying in production
#[cfg(test)]
impl Clone for Page {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::PageId;
    use crate::storage::page::PageType;

    #[test]
    fn test_page_new() {
        let page = Page::new(4096);
        assert_eq!(page.size(), 4096);
        assert_eq!(page.as_slice()[0], 0);
        assert_eq!(page.as_slice()[4095], 0);

        assert_eq!(Page::new(512).size(), 512);
    }

    #[test]
    fn test_page_read_write() {
        let mut page = Page::new(4096);

        page.as_mut_slice()[0] = 0xFF;
        page.as_mut_slice()[4095] = 0xCD;

        assert_eq!(page.as_slice()[0], 0xFF);
        assert_eq!(page.as_slice()[4095], 0xCD);

        page.reset();
        assert_eq!(page.as_slice()[0], 0);
    }

    #[test]
    fn test_page_checksum_and_lsn() {
        let mut page = Page::new(1024);
        page.set_header(&PageHeader::new(PageId::new(3), PageType::Data));
        page.as_mut_slice()[200] = 0x42;
        page.set_lsn(Lsn::new(17));
        page.update_checksum();

        assert!(page.verify_checksum());
        assert_eq!(page.lsn(), Lsn::new(17));
        assert_eq!(page.header().page_id, PageId::new(3));

        page.as_mut_slice()[200] = 0x43;
        assert!(!page.verify_checksum());
    }

    #[test]
    fn test_page_clone_in_tests() {
        let mut page = Page::new(4096);
        page.as_mut_slice()[0] = 0xAB;

        let cloned = page.clone();
        assert_eq!(cloned.as_slice()[0], 0xAB);
        assert_eq!(page.to_boxed()[0], 0xAB);
    }
}
