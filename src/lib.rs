//! pagedb - a page-oriented storage engine with a B+Tree index.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            Database                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              Index Layer (index/)                        │   │
//! │  │     B+Tree: search, insert, delete, range scan           │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │           Recovery Layer (recovery/)                     │   │
//! │  │   MiniTxn → WAL (group commit) → replay on open          │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │       Buffer Pool (buffer/)                              │   │
//! │  │   BufferPoolManager + Frame + FIFO eviction + stats      │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │           Storage Layer (storage/)                       │   │
//! │  │  DiskManager + PageStore (checksums) + page formats      │   │
//! │  │  + FreeListManager                                       │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (PageId, Lsn, Error, Config)
//! - [`storage`] - Disk I/O, page formats and the freelist
//! - [`buffer`] - The page cache
//! - [`recovery`] - Write-ahead logging, mini-transactions and replay
//! - [`index`] - The B+Tree
//!
//! # Quick Start
//! ```no_run
//! use pagedb::{Config, Database};
//!
//! let db = Database::open("my_database.db", Config::default())?;
//! db.insert(b"key", b"value")?;
//! assert_eq!(db.search(b"key")?, b"value");
//! db.close()?;
//! # Ok::<(), pagedb::Error>(())
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod recovery;
pub mod storage;

mod database;

// Re-export commonly used items at crate root for convenience
pub use common::{Config, Error, Lsn, PageId, RecordId, Result, SyncPolicy};
pub use database::{Database, DatabaseStats};

pub use buffer::{BufferPoolStats, StatsSnapshot};
pub use index::{RangeScan, TreeSummary};
pub use recovery::{RecoveryReport, WalStatsSnapshot};
pub use storage::page::{MetadataPage, PageType};
