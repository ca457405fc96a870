//! Page and record identifier types.

use std::fmt;

/// Identifies a page in the database file.
///
/// Page `N` lives at byte offset `N * page_size`. Page 0 is always the
/// metadata page, which is why `0` doubles as the "no page" marker in
/// on-disk links (`next_leaf`, `next_free_list`, `first_free_list_page`).
///
/// # Example
/// ```
/// use pagedb::PageId;
///
/// let page_id = PageId::new(42);
/// assert!(!page_id.is_none());
/// assert!(PageId::NONE.is_none());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PageId(pub u64);

impl PageId {
    /// The metadata page.
    pub const METADATA: PageId = PageId(0);

    /// Terminator for page-id links.
    pub const NONE: PageId = PageId(0);

    /// Create a new PageId.
    #[inline]
    pub fn new(id: u64) -> Self {
        PageId(id)
    }

    /// True if this id is the link terminator.
    #[inline]
    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    /// Byte offset of this page in a file of `page_size` pages.
    #[inline]
    pub fn offset(&self, page_size: usize) -> u64 {
        self.0 * page_size as u64
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Page({})", self.0)
    }
}

/// Location of a record: a data page plus a slot index within it.
///
/// This is what B+Tree leaves point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot: u16,
}

impl RecordId {
    pub fn new(page_id: PageId, slot: u16) -> Self {
        Self { page_id, slot }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.page_id, self.slot)
    }
}
