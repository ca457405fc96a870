//! Disk Manager - low-level file I/O for database pages.
//!
//! The [`DiskManager`] handles all direct file operations:
//! - Reading and writing whole pages at their offsets
//! - Growing the file to reserve space for new pages
//! - Syncing the file to stable storage

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::common::{Error, PageId, Result};

/// Manages disk I/O for a single database file.
///
/// # File Layout
/// The database is stored as a single file with pages laid out sequentially:
/// ```text
/// ┌─────────┬─────────┬─────────┬─────────┬─────────┐
/// │ Page 0  │ Page 1  │ Page 2  │  ...    │ Page N  │
/// └─────────┴─────────┴─────────┴─────────┴─────────┘
/// Offset:  0      P        2P      ...      N×P
/// ```
///
/// Page N is located at file offset `N × page_size`.
///
/// # Thread Safety
/// `DiskManager` is **single-threaded**. The page store serializes access
/// through a mutex.
///
/// # Durability
/// Writes go to the OS page cache. Callers decide when to [`sync`](Self::sync);
/// the write-ahead log makes unsynced page writes recoverable.
pub struct DiskManager {
    file: File,
    page_size: usize,
    /// Number of whole pages in the file.
    page_count: u64,
}

impl DiskManager {
    /// Create a new database file.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be created.
    pub fn create<P: AsRef<Path>>(path: P, page_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        Ok(Self {
            file,
            page_size,
            page_count: 0,
        })
    }

    /// Open an existing database file.
    ///
    /// # Errors
    /// Returns an error if the file doesn't exist or cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P, page_size: usize) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        // Calculate page count from file size
        let file_size = file.metadata()?.len();
        let page_count = file_size / page_size as u64;

        Ok(Self {
            file,
            page_size,
            page_count,
        })
    }

    /// Open an existing database file, or create if it doesn't exist.
    pub fn open_or_create<P: AsRef<Path>>(path: P, page_size: usize) -> Result<Self> {
        if path.as_ref().exists() {
            Self::open(path, page_size)
        } else {
            Self::create(path, page_size)
        }
    }

    /// Read up to `buf.len()` bytes from `offset`, returning how many were
    /// available. Used to inspect page 0 before its size is trusted.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read(&mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        Ok(filled)
    }

    /// Read a page from disk into `buf`.
    ///
    /// # Errors
    /// Returns `Error::OutOfRange` if the page lies beyond the end of the file.
    pub fn read_page(&mut self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), self.page_size);
        if page_id.0 >= self.page_count {
            return Err(Error::OutOfRange {
                page_id,
                total_pages: self.page_count,
            });
        }

        self.file.seek(SeekFrom::Start(page_id.offset(self.page_size)))?;
        self.file.read_exact(buf)?;

        Ok(())
    }

    /// Write a page to disk, extending the file if the page lies past its end.
    pub fn write_page(&mut self, page_id: PageId, data: &[u8]) -> Result<()> {
        debug_assert_eq!(data.len(), self.page_size);

        self.file.seek(SeekFrom::Start(page_id.offset(self.page_size)))?;
        self.file.write_all(data)?;

        if page_id.0 >= self.page_count {
            self.page_count = page_id.0 + 1;
        }
        Ok(())
    }

    /// Grow the file so that it holds at least `page_count` pages.
    ///
    /// New pages read back as zeros.
    pub fn reserve(&mut self, page_count: u64) -> std::io::Result<()> {
        if page_count > self.page_count {
            self.file.set_len(page_count * self.page_size as u64)?;
            self.page_count = page_count;
        }
        Ok(())
    }

    /// Flush file contents to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Get the number of pages in the database file.
    #[inline]
    pub fn page_count(&self) -> u64 {
        self.page_count
    }

    /// Get the size of a page.
    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Get the length of the database file in bytes.
    pub fn file_len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}
