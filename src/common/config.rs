//! Configuration for pagedb.
//!
//! Format constants live here next to the runtime [`Config`]; the page
//! size itself is chosen per database at creation time and recorded in the
//! metadata page.

use std::path::{Path, PathBuf};

/// Default size of a page in bytes (4KB).
///
/// Matches the OS page size on most systems.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Smallest supported page size.
pub const MIN_PAGE_SIZE: usize = 512;

/// Largest supported page size. Slot offsets inside data pages are kept
/// well within `u32`, but leaf slot indices are `u16`.
pub const MAX_PAGE_SIZE: usize = 64 * 1024;

/// Default number of buffer-pool frames.
pub const DEFAULT_CACHE_PAGES: usize = 256;

/// Default WAL size that triggers an automatic checkpoint (8 MiB).
pub const DEFAULT_CHECKPOINT_WAL_BYTES: u64 = 8 * 1024 * 1024;

/// On-disk format version written to the metadata page.
pub const DB_VERSION: u32 = 1;

/// Durability of WAL commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPolicy {
    /// fsync the log before a commit returns.
    #[default]
    Always,
    /// Write the log to the OS but never fsync it. Survives a process crash,
    /// not a power loss. Meant for tests and bulk loads.
    Never,
}

/// Options for opening or creating a database.
///
/// # Example
/// ```
/// use pagedb::{Config, SyncPolicy};
///
/// let config = Config::new()
///     .with_page_size(8192)
///     .with_cache_pages(64)
///     .with_sync_policy(SyncPolicy::Never);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Page size in bytes, fixed at creation.
    pub page_size: usize,

    /// Number of frames in the buffer pool.
    pub cache_pages: usize,

    /// Upper bound on the page file size, in pages.
    pub max_pages: Option<u64>,

    /// Location of the write-ahead log. Defaults to `<db path>-wal`.
    pub wal_path: Option<PathBuf>,

    /// Whether commits fsync the log.
    pub sync_policy: SyncPolicy,

    /// WAL size in bytes past which a mutation triggers a checkpoint.
    pub checkpoint_wal_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            cache_pages: DEFAULT_CACHE_PAGES,
            max_pages: None,
            wal_path: None,
            sync_policy: SyncPolicy::default(),
            checkpoint_wal_bytes: DEFAULT_CHECKPOINT_WAL_BYTES,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub fn with_cache_pages(mut self, frames: usize) -> Self {
        self.cache_pages = frames;
        self
    }

    #[must_use]
    pub fn with_max_pages(mut self, max_pages: u64) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    #[must_use]
    pub fn with_wal_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.wal_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.sync_policy = policy;
        self
    }

    #[must_use]
    pub fn with_checkpoint_wal_bytes(mut self, bytes: u64) -> Self {
        self.checkpoint_wal_bytes = bytes;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if !self.page_size.is_power_of_two()
            || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.page_size)
        {
            return Err(crate::Error::InvalidConfig(format!(
                "page size {} must be a power of two in {}..={}",
                self.page_size, MIN_PAGE_SIZE, MAX_PAGE_SIZE
            )));
        }

        // Crabbing holds a root-to-leaf path plus siblings, data, metadata
        // and freelist pages at once.
        if self.cache_pages < 16 {
            return Err(crate::Error::InvalidConfig(format!(
                "cache must hold at least 16 pages, got {}",
                self.cache_pages
            )));
        }

        if let Some(max) = self.max_pages {
            if max < 2 {
                return Err(crate::Error::InvalidConfig(
                    "max_pages must leave room for the metadata page and the root".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// The log path used for a database stored at `db_path`.
    pub fn wal_path_for(&self, db_path: &Path) -> PathBuf {
        match &self.wal_path {
            Some(path) => path.clone(),
            None => {
                let mut name = db_path.as_os_str().to_owned();
                name.push("-wal");
                PathBuf::from(name)
            }
        }
    }
}
