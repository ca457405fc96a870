//! Storage layer - disk I/O and page formats.
//!
//! This module handles persistent storage:
//! - [`DiskManager`] - Low-level file I/O
//! - [`PageStore`] - Checksummed page reads and writes
//! - [`FreeListManager`] - Reuse of freed pages
//! - [`page`] - Page types and layouts

mod disk_manager;
mod freelist;
pub mod page;
mod page_store;

pub use disk_manager::DiskManager;
pub use freelist::{FreeListManager, PageAccess};
pub use page_store::PageStore;
