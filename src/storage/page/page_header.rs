//! Page header and type definitions.
//!
//! Every page starts with a [`PageHeader`] containing metadata:
//! - the page's own ID and [`PageType`] discriminator
//! - CRC32 checksum for integrity
//! - LSN of the last logged modification
//! - free-space pointer for the body format

use crate::common::{Lsn, PageId};

/// Type of page stored on disk.
///
/// Uses `#[repr(u8)]` to guarantee a 1-byte representation for serialization.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    /// Uninitialized or corrupted page.
    #[default]
    Invalid = 0,
    /// Database metadata (page 0 only).
    Metadata = 1,
    /// Slotted page holding record bytes.
    Data = 2,
    /// B+Tree node, leaf or internal.
    Index = 3,
    /// Link in the chain of reclaimable page IDs.
    FreeList = 4,
}

impl PageType {
    /// Convert from u8, returning Invalid for unknown values.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => PageType::Metadata,
            2 => PageType::Data,
            3 => PageType::Index,
            4 => PageType::FreeList,
            _ => PageType::Invalid,
        }
    }
}

/// Metadata stored at the beginning of every page.
///
/// # Layout (32 bytes, big-endian)
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       8     page_id
/// 8       1     page_type (PageType as u8)
/// 9       3     reserved
/// 12      4     checksum (CRC32)
/// 16      8     lsn
/// 24      4     free_space_pointer
/// 28      4     reserved
/// ```
///
/// # Checksum
/// The checksum is computed over the entire page with the checksum field
/// itself set to zero. This allows verification without special handling.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    /// ID of this page, written when the page is formatted.
    pub page_id: PageId,
    /// Type of this page.
    pub page_type: PageType,
    /// CRC32 checksum of the page contents.
    pub checksum: u32,
    /// Log Sequence Number of last modification.
    pub lsn: Lsn,
    /// First unused byte of the body; meaning depends on the page type.
    pub free_space_pointer: u32,
}

impl PageHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 32;

    /// Offset of each field within the header.
    pub const OFFSET_PAGE_ID: usize = 0;
    pub const OFFSET_PAGE_TYPE: usize = 8;
    pub const OFFSET_CHECKSUM: usize = 12;
    pub const OFFSET_LSN: usize = 16;
    pub const OFFSET_FREE_SPACE: usize = 24;

    /// Create a new header for a freshly formatted page.
    ///
    /// Checksum and LSN are initialized to zero, the free-space pointer to
    /// the end of the header.
    pub fn new(page_id: PageId, page_type: PageType) -> Self {
        Self {
            page_id,
            page_type,
            checksum: 0,
            lsn: Lsn::ZERO,
            free_space_pointer: Self::SIZE as u32,
        }
    }

    /// Read a header from the beginning of a byte slice.
    ///
    /// # Panics
    /// Panics if `data.len() < PageHeader::SIZE`.
    pub fn from_bytes(data: &[u8]) -> Self {
        assert!(data.len() >= Self::SIZE, "buffer too small for PageHeader");

        Self {
            page_id: PageId::new(read_u64(data, Self::OFFSET_PAGE_ID)),
            page_type: PageType::from_u8(data[Self::OFFSET_PAGE_TYPE]),
            checksum: read_u32(data, Self::OFFSET_CHECKSUM),
            lsn: Lsn::new(read_u64(data, Self::OFFSET_LSN)),
            free_space_pointer: read_u32(data, Self::OFFSET_FREE_SPACE),
        }
    }

    /// Write this header to the beginning of a byte slice.
    ///
    /// Reserved bytes are zeroed.
    ///
    /// # Panics
    /// Panics if `data.len() < PageHeader::SIZE`.
    pub fn write_to(&self, data: &mut [u8]) {
        assert!(data.len() >= Self::SIZE, "buffer too small for PageHeader");

        data[..Self::SIZE].fill(0);
        write_u64(data, Self::OFFSET_PAGE_ID, self.page_id.0);
        data[Self::OFFSET_PAGE_TYPE] = self.page_type as u8;
        write_u32(data, Self::OFFSET_CHECKSUM, self.checksum);
        write_u64(data, Self::OFFSET_LSN, self.lsn.as_u64());
        write_u32(data, Self::OFFSET_FREE_SPACE, self.free_space_pointer);
    }

    /// Compute CRC32 checksum of a page.
    ///
    /// The checksum is computed with the checksum field (bytes 12-15) zeroed
    /// out, so the checksum doesn't include itself.
    pub fn compute_checksum(page_data: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();

        hasher.update(&page_data[..Self::OFFSET_CHECKSUM]);

        // Skip checksum field by feeding zeros instead
        hasher.update(&[0u8; 4]);

        hasher.update(&page_data[Self::OFFSET_CHECKSUM + 4..]);

        hasher.finalize()
    }

    /// Verify that the stored checksum matches the computed checksum.
    pub fn verify_checksum(&self, page_data: &[u8]) -> bool {
        self.checksum == Self::compute_checksum(page_data)
    }
}

// ----------------------------------------------------------------------------
// Big-endian field helpers shared by the page formats.
// ----------------------------------------------------------------------------

#[inline]
pub(crate) fn read_u16(data: &[u8], offset: usize) -> u16 {
    let mut buf = [0u8; 2];
    buf.copy_from_slice(&data[offset..offset + 2]);
    u16::from_be_bytes(buf)
}

#[inline]
pub(crate) fn read_u32(data: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&data[offset..offset + 4]);
    u32::from_be_bytes(buf)
}

#[inline]
pub(crate) fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[offset..offset + 8]);
    u64::from_be_bytes(buf)
}

#[inline]
pub(crate) fn write_u16(data: &mut [u8], offset: usize, value: u16) {
    data[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

#[inline]
pub(crate) fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

#[inline]
pub(crate) fn write_u64(data: &mut [u8], offset: usize, value: u64) {
    data[offset..offset + 8].copy_from_slice(&value.to_be_bytes());
}
