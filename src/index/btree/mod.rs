//! B+Tree index.
//!
//! - [`BTreeIndex`] - search, insert, delete and verification
//! - [`RangeScan`] - ordered iteration over a key range

mod scan;
mod tree;

pub use scan::RangeScan;
pub use tree::{BTreeIndex, TreeSummary};
