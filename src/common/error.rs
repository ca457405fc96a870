//! Error types for pagedb.

use thiserror::Error;

use super::PageId;

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// All possible errors in pagedb.
///
/// One enum for the whole engine, so a caller can match on the outcome of
/// any operation without juggling per-layer error types.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the page file or the log.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A page failed checksum verification on read.
    ///
    /// The page id is recorded as suspect; the process keeps running.
    #[error("checksum mismatch on page {page_id}: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        page_id: PageId,
        stored: u32,
        computed: u32,
    },

    /// Requested page lies beyond the end of the page file.
    #[error("page {page_id} out of range (file holds {total_pages} pages)")]
    OutOfRange { page_id: PageId, total_pages: u64 },

    /// The file is not a pagedb database, or was created with an
    /// incompatible version or page size.
    #[error("format error: {0}")]
    Format(String),

    /// The key is not in the index. A normal outcome of search and delete.
    #[error("key not found")]
    KeyNotFound,

    /// The key is already in the index.
    #[error("duplicate key")]
    DuplicateKey,

    /// The page file could not grow.
    #[error("out of space: cannot grow beyond {total_pages} pages")]
    OutOfSpace {
        total_pages: u64,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Key exceeds the largest key a node can hold.
    #[error("key of {len} bytes exceeds maximum of {max}")]
    KeyTooLarge { len: usize, max: usize },

    /// Record exceeds the largest record a data page can hold.
    #[error("record of {len} bytes exceeds maximum of {max}")]
    RecordTooLarge { len: usize, max: usize },

    /// Page content is structurally invalid (wrong type, bad lengths).
    #[error("page {page_id} is corrupted: {reason}")]
    Corrupted { page_id: PageId, reason: String },

    /// Buffer pool has no free frames and cannot evict any pages.
    ///
    /// This happens when all frames are pinned.
    #[error("no free frames available in buffer pool")]
    NoFreeFrames,

    /// Attempted to drop a page from the buffer pool while it is pinned.
    #[error("page {0} is pinned")]
    PagePinned(PageId),

    /// Configuration rejected by [`Config::validate`](crate::Config::validate).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An earlier log write failed; the log refuses further writes until the
    /// database is reopened.
    #[error("write-ahead log unavailable after an earlier I/O failure")]
    WalUnavailable,
}

impl Error {
    /// Creates a corrupted-page error.
    pub fn corrupted(page_id: PageId, reason: impl Into<String>) -> Self {
        Error::Corrupted {
            page_id,
            reason: reason.into(),
        }
    }

    /// True for [`Error::KeyNotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::KeyNotFound)
    }

    /// True if this error means on-disk bytes can't be trusted.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::ChecksumMismatch { .. } | Error::Corrupted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::OutOfRange {
            page_id: PageId::new(42),
            total_pages: 10,
        };
        assert_eq!(
            format!("{}", err),
            "page Page(42) out of range (file holds 10 pages)"
        );

        let err = Error::NoFreeFrames;
        assert_eq!(format!("{}", err), "no free frames available in buffer pool");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();

        match err {
            Error::Io(_) => {} // Success
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_classification() {
        assert!(Error::KeyNotFound.is_not_found());
        assert!(!Error::DuplicateKey.is_not_found());

        let err = Error::ChecksumMismatch {
            page_id: PageId::new(3),
            stored: 1,
            computed: 2,
        };
        assert!(err.is_corruption());
        assert!(Error::corrupted(PageId::new(3), "bad type").is_corruption());
        assert!(!Error::NoFreeFrames.is_corruption());
    }
}
