//! The metadata page (page 0).
//!
//! # Layout
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 0       32    PageHeader
//! 32      4     magic ("PGDB")
//! 36      4     db_version
//! 40      4     page_size
//! 44      4     reserved
//! 48      8     root page ID
//! 56      8     first freelist page ID (0 = empty)
//! 64      8     total_pages
//! ```

use crate::common::config::{DB_VERSION, MAX_PAGE_SIZE, MIN_PAGE_SIZE};
use crate::common::{Error, Lsn, PageId, Result};

use super::page_header::{read_u32, read_u64, write_u32, write_u64, PageHeader, PageType};

/// File identity tag at offset 32 of page 0.
pub const MAGIC: u32 = u32::from_be_bytes(*b"PGDB");

const OFFSET_MAGIC: usize = 32;
const OFFSET_VERSION: usize = 36;
const OFFSET_PAGE_SIZE: usize = 40;
const OFFSET_ROOT: usize = 48;
const OFFSET_FIRST_FREE_LIST: usize = 56;
const OFFSET_TOTAL_PAGES: usize = 64;

/// Bytes of page 0 needed to identify the file.
pub const METADATA_PREFIX_LEN: usize = 72;

/// Decoded contents of the metadata page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataPage {
    pub db_version: u32,
    pub page_size: u32,
    /// Root of the B+Tree.
    pub root: PageId,
    /// Head of the freelist chain, [`PageId::NONE`] when empty.
    pub first_free_list: PageId,
    /// Pages in use, metadata page included.
    pub total_pages: u64,
}

impl MetadataPage {
    /// Metadata of a freshly created database: page 0 plus an empty root
    /// leaf at page 1.
    pub fn new(page_size: usize) -> Self {
        Self {
            db_version: DB_VERSION,
            page_size: page_size as u32,
            root: PageId::new(1),
            first_free_list: PageId::NONE,
            total_pages: 2,
        }
    }

    /// Check the identity fields of a raw, unverified page 0 and return the
    /// page size it declares.
    ///
    /// Runs before the page size is known, so it only looks at the first
    /// [`METADATA_PREFIX_LEN`] bytes.
    pub fn peek_page_size(raw: &[u8]) -> Result<usize> {
        if raw.len() < METADATA_PREFIX_LEN {
            return Err(Error::Format(format!(
                "file too short for a metadata page ({} bytes)",
                raw.len()
            )));
        }
        let magic = read_u32(raw, OFFSET_MAGIC);
        if magic != MAGIC {
            return Err(Error::Format(format!("bad magic {:#010x}", magic)));
        }
        let version = read_u32(raw, OFFSET_VERSION);
        if version != DB_VERSION {
            return Err(Error::Format(format!(
                "unsupported database version {} (expected {})",
                version, DB_VERSION
            )));
        }
        let page_size = read_u32(raw, OFFSET_PAGE_SIZE) as usize;
        if !page_size.is_power_of_two() || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(Error::Format(format!("invalid page size {}", page_size)));
        }
        Ok(page_size)
    }

    /// Decode a checksum-verified metadata page.
    pub fn decode(data: &[u8]) -> std::result::Result<Self, String> {
        let header = PageHeader::from_bytes(data);
        if header.page_type != PageType::Metadata {
            return Err(format!("expected metadata page, found {:?}", header.page_type));
        }
        if read_u32(data, OFFSET_MAGIC) != MAGIC {
            return Err("bad magic".to_string());
        }
        Ok(Self {
            db_version: read_u32(data, OFFSET_VERSION),
            page_size: read_u32(data, OFFSET_PAGE_SIZE),
            root: PageId::new(read_u64(data, OFFSET_ROOT)),
            first_free_list: PageId::new(read_u64(data, OFFSET_FIRST_FREE_LIST)),
            total_pages: read_u64(data, OFFSET_TOTAL_PAGES),
        })
    }

    /// Encode over `data`, keeping the page's current LSN.
    pub fn encode_into(&self, data: &mut [u8]) {
        let lsn: Lsn = PageHeader::from_bytes(data).lsn;
        data.fill(0);

        let mut header = PageHeader::new(PageId::METADATA, PageType::Metadata);
        header.lsn = lsn;
        header.free_space_pointer = METADATA_PREFIX_LEN as u32;
        header.write_to(data);

        write_u32(data, OFFSET_MAGIC, MAGIC);
        write_u32(data, OFFSET_VERSION, self.db_version);
        write_u32(data, OFFSET_PAGE_SIZE, self.page_size);
        write_u64(data, OFFSET_ROOT, self.root.0);
        write_u64(data, OFFSET_FIRST_FREE_LIST, self.first_free_list.0);
        write_u64(data, OFFSET_TOTAL_PAGES, self.total_pages);
    }
}
