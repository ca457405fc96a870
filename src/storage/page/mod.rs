//! Page types and layouts.
//!
//! This module contains:
//! - [`Page`] - The raw page-sized data container
//! - [`PageHeader`] - Metadata at the start of every page
//! - [`PageType`] - Discriminator for different page formats
//! - One module per body format, and [`PageBody`] to decode any of them

mod body;
mod data_page;
mod freelist_page;
mod index_page;
mod metadata_page;
#[allow(clippy::module_inception)]
mod page;
mod page_header;

pub use body::PageBody;
pub use data_page::{max_record_len, DataPage, DATA_START};
pub use freelist_page::{freelist_capacity, FreeListPage};
pub use index_page::{max_entry_size, max_key_len, IndexNode, INDEX_HEADER_SIZE};
pub use metadata_page::{MetadataPage, MAGIC, METADATA_PREFIX_LEN};
pub use page::Page;
pub(crate) use page::{stamp_checksum, stamp_lsn};
pub use page_header::{PageHeader, PageType};
