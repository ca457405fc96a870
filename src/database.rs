//! The caller-facing database handle.

use std::collections::BTreeSet;
use std::fs::File;
use std::io;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::buffer::{BufferPoolManager, StatsSnapshot};
use crate::common::{Config, Error, Lsn, PageId, Result};
use crate::index::{BTreeIndex, RangeScan, TreeSummary};
use crate::recovery::{recover, MiniTxn, RecoveryReport, Wal, WalStatsSnapshot};
use crate::storage::page::{IndexNode, MetadataPage, Page, PageBody};
use crate::storage::{FreeListManager, PageAccess, PageStore};

/// Counters from every layer of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseStats {
    pub buffer: StatsSnapshot,
    pub wal: WalStatsSnapshot,
    /// Current size of the log in bytes.
    pub wal_bytes: u64,
    pub checkpoints: u64,
}

/// An open database.
///
/// All operations take `&self`; share the handle between threads with an
/// `Arc`. Mutations are atomic and, once they return, durable according to
/// the configured [`SyncPolicy`](crate::SyncPolicy).
///
/// Dropping the handle without [`close`](Self::close) leaves the log in
/// place; the next open replays it.
///
/// # Example
/// ```no_run
/// use pagedb::{Config, Database};
///
/// let db = Database::open("data.db", Config::default())?;
/// db.insert(b"apple", b"red")?;
/// assert_eq!(db.search(b"apple")?, b"red");
///
/// for entry in db.range_scan(b"a", b"b") {
///     let (key, record) = entry?;
///     println!("{:?} => {:?}", key, record);
/// }
/// db.close()?;
/// # Ok::<(), pagedb::Error>(())
/// ```
pub struct Database {
    path: PathBuf,
    config: Config,
    bpm: Arc<BufferPoolManager>,
    wal: Arc<Wal>,
    tree: BTreeIndex,
    /// Mutations hold this shared; checkpoint and verify hold it exclusive.
    ops: RwLock<()>,
    checkpoints: AtomicU64,
    recovery: RecoveryReport,
}

/// Write page 0 and an empty root leaf to a new file.
fn bootstrap(store: &PageStore) -> Result<()> {
    let page_size = store.page_size();
    let meta = MetadataPage::new(page_size);

    let mut page = Page::new(page_size);
    meta.encode_into(page.as_mut_slice());
    store.write_page(PageId::METADATA, page.as_slice(), Lsn::ZERO)?;

    let mut page = Page::new(page_size);
    IndexNode::new_leaf(meta.root).encode_into(page.as_mut_slice());
    store.write_page(meta.root, page.as_slice(), Lsn::ZERO)?;

    store.sync()
}

/// Build a new database beside `path` and rename it into place, so a crash
/// leaves either no database or a complete one.
fn create(path: &Path, wal_path: &Path, page_size: usize) -> Result<()> {
    // A log left over from an earlier file must not replay into this one.
    if remove_if_exists(wal_path)? {
        warn!(path = %wal_path.display(), "removed stale WAL");
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    if remove_if_exists(&tmp_path)? {
        debug!(
            path = %tmp_path.display(),
            "removed partial database from an interrupted create"
        );
    }

    bootstrap(&PageStore::open(&tmp_path, page_size)?)?;
    std::fs::rename(&tmp_path, path)?;
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        File::open(dir)?.sync_all()?;
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

impl Database {
    /// Open the database at `path`, creating it if the file is missing or
    /// empty, and recover from the log.
    ///
    /// # Errors
    /// - `Error::InvalidConfig` if `config` is rejected
    /// - `Error::Format` if the file is not a database, has an unsupported
    ///   version, or uses a different page size
    /// - `Error::Io` on I/O failure
    pub fn open<P: AsRef<Path>>(path: P, config: Config) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();
        let wal_path = config.wal_path_for(&path);

        let is_new = match std::fs::metadata(&path) {
            Ok(meta) => meta.len() == 0,
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => return Err(e.into()),
        };
        if is_new {
            create(&path, &wal_path, config.page_size)?;
            info!(path = %path.display(), page_size = config.page_size, "created database");
        }

        let store = PageStore::open(&path, config.page_size)?;

        let wal = Wal::open(&wal_path, config.page_size, config.sync_policy)?;
        let recovery = recover(&store, &wal)?;
        if recovery.records_scanned > 0 {
            store.sync()?;
            wal.truncate_through(wal.last_lsn())?;
        }
        // The log may be new or moved while the page file kept its LSNs.
        wal.advance_past(store.max_lsn()?)?;

        let meta = {
            let mut page = Page::new(config.page_size);
            store.read_page(PageId::METADATA, page.as_mut_slice())?;
            MetadataPage::decode(page.as_slice())
                .map_err(|reason| Error::corrupted(PageId::METADATA, reason))?
        };

        let bpm = Arc::new(BufferPoolManager::new(config.cache_pages, store));
        let wal = Arc::new(wal);
        let tree = BTreeIndex::new(
            Arc::clone(&bpm),
            Arc::clone(&wal),
            meta.root,
            config.max_pages,
        );

        info!(
            path = %path.display(),
            root = %meta.root,
            total_pages = meta.total_pages,
            "opened database"
        );
        Ok(Self {
            path,
            config,
            bpm,
            wal,
            tree,
            ops: RwLock::new(()),
            checkpoints: AtomicU64::new(0),
            recovery,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// The record stored under `key`.
    ///
    /// # Errors
    /// `Error::KeyNotFound` if the key is absent.
    pub fn search(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.tree.search(key)
    }

    /// Entries with `start <= key <= end`, in ascending key order.
    pub fn range_scan(&self, start: &[u8], end: &[u8]) -> RangeScan<'_> {
        self.tree.range(
            Bound::Included(start.to_vec()),
            Bound::Included(end.to_vec()),
        )
    }

    /// Every entry, in ascending key order.
    pub fn iter(&self) -> RangeScan<'_> {
        self.tree.range(Bound::Unbounded, Bound::Unbounded)
    }

    /// Number of keys, counted by a full scan.
    pub fn len(&self) -> Result<usize> {
        self.iter().try_fold(0, |n, entry| entry.map(|_| n + 1))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.iter().next().transpose()?.is_none())
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Insert `record` under `key`.
    ///
    /// # Errors
    /// - `Error::DuplicateKey` if the key exists
    /// - `Error::KeyTooLarge` / `Error::RecordTooLarge`
    /// - `Error::OutOfSpace` if the file cannot grow; nothing is changed
    pub fn insert(&self, key: &[u8], record: &[u8]) -> Result<()> {
        {
            let _ops = self.ops.read();
            self.tree.insert(key, record)?;
        }
        self.maybe_checkpoint();
        Ok(())
    }

    /// Remove `key` and its record.
    ///
    /// # Errors
    /// `Error::KeyNotFound` if the key is absent.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        {
            let _ops = self.ops.read();
            self.tree.delete(key)?;
        }
        self.maybe_checkpoint();
        Ok(())
    }

    // ========================================================================
    // Checkpoint and shutdown
    // ========================================================================

    /// Write every cached page to the page file and empty the log.
    pub fn checkpoint(&self) -> Result<()> {
        let _ops = self.ops.write();
        self.checkpoint_locked()
    }

    fn checkpoint_locked(&self) -> Result<()> {
        let through = self.wal.last_lsn();
        self.wal.flush(through)?;
        self.bpm.flush_all_pages()?;
        self.bpm.store().sync()?;
        self.wal.truncate_through(through)?;

        self.checkpoints.fetch_add(1, Ordering::Relaxed);
        info!(%through, "checkpoint complete");
        Ok(())
    }

    fn maybe_checkpoint(&self) {
        let threshold = self.config.checkpoint_wal_bytes;
        if self.wal.size() <= threshold {
            return;
        }

        let _ops = self.ops.write();
        if self.wal.size() <= threshold {
            return;
        }
        debug!(wal_bytes = self.wal.size(), threshold, "automatic checkpoint");
        // The mutation is already durable in the log.
        if let Err(e) = self.checkpoint_locked() {
            warn!(error = %e, "automatic checkpoint failed");
        }
    }

    /// Checkpoint and close.
    pub fn close(self) -> Result<()> {
        self.checkpoint()?;
        info!(
            path = %self.path.display(),
            buffer = %self.bpm.stats().snapshot(),
            "closed database"
        );
        Ok(())
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Current contents of the metadata page.
    pub fn metadata(&self) -> Result<MetadataPage> {
        let guard = self.bpm.fetch_page_read(PageId::METADATA)?;
        MetadataPage::decode(guard.as_slice())
            .map_err(|reason| Error::corrupted(PageId::METADATA, reason))
    }

    pub fn stats(&self) -> DatabaseStats {
        DatabaseStats {
            buffer: self.bpm.stats().snapshot(),
            wal: self.wal.stats(),
            wal_bytes: self.wal.size(),
            checkpoints: self.checkpoints.load(Ordering::Relaxed),
        }
    }

    /// Pages whose most recent read failed checksum verification.
    pub fn suspect_pages(&self) -> Vec<PageId> {
        self.bpm.store().suspect_pages()
    }

    /// What recovery did when this handle was opened.
    pub fn recovery_report(&self) -> RecoveryReport {
        self.recovery
    }

    /// Check the tree and the freelist for consistency.
    ///
    /// Besides the tree invariants, checks that free pages lie within the
    /// file, appear once, and are not in use by the tree. Blocks mutations
    /// while it runs.
    pub fn verify(&self) -> Result<TreeSummary> {
        let _ops = self.ops.write();
        let walk = self.tree.walk()?;

        let mut txn = MiniTxn::new(&self.bpm, &self.wal, self.config.max_pages);
        let meta = txn.metadata()?;
        let free = FreeListManager::collect(&mut txn)?;
        drop(txn);

        match self.page_body(PageId::METADATA)? {
            PageBody::Metadata(_) => {}
            other => return Err(unexpected_page(PageId::METADATA, "metadata", &other)),
        }
        for (&page_id, &referenced) in &walk.data_pages {
            match self.page_body(page_id)? {
                PageBody::Data { live, .. } if live == referenced => {}
                PageBody::Data { live, .. } => {
                    return Err(Error::corrupted(
                        page_id,
                        format!("{} live records but {} index entries", live, referenced),
                    ))
                }
                other => return Err(unexpected_page(page_id, "data", &other)),
            }
        }

        let mut used: BTreeSet<PageId> = walk.index_pages.iter().copied().collect();
        used.extend(walk.data_pages.keys().copied());
        used.insert(PageId::METADATA);

        let mut seen = BTreeSet::new();
        for page_id in free {
            if page_id.0 >= meta.total_pages {
                return Err(Error::corrupted(page_id, "free page beyond total_pages"));
            }
            if used.contains(&page_id) {
                return Err(Error::corrupted(page_id, "page is both free and in use"));
            }
            if !seen.insert(page_id) {
                return Err(Error::corrupted(page_id, "page freed twice"));
            }
        }
        if let Some(&last) = used.iter().next_back() {
            if last.0 >= meta.total_pages {
                return Err(Error::corrupted(last, "page in use beyond total_pages"));
            }
        }

        Ok(walk.summary)
    }
}

impl Database {
    fn page_body(&self, page_id: PageId) -> Result<PageBody> {
        self.bpm.fetch_page_read(page_id)?.body()
    }
}

fn unexpected_page(page_id: PageId, expected: &str, found: &PageBody) -> Error {
    Error::corrupted(
        page_id,
        format!("expected {} page, found {:?}", expected, found.page_type()),
    )
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("root", &self.tree.root())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::SyncPolicy;
    use crate::storage::page::DataPage;
    use tempfile::tempdir;

    fn config() -> Config {
        Config::new()
            .with_page_size(1024)
            .with_cache_pages(32)
            .with_sync_policy(SyncPolicy::Never)
    }

    fn key(i: u32) -> [u8; 4] {
        i.to_be_bytes()
    }

    #[test]
    fn test_log_failure_rolls_back_and_keeps_reads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        let db = Database::open(&path, config()).unwrap();
        for i in 0..50 {
            db.insert(&key(i), b"committed").unwrap();
        }

        let root = db.tree.root();
        let before = db.bpm.fetch_page_read(root).unwrap().as_slice().to_vec();

        db.wal.fail_writes();
        assert!(matches!(db.insert(b"lost", b"x"), Err(Error::Io(_))));
        assert_eq!(db.bpm.fetch_page_read(root).unwrap().as_slice(), &before[..]);

        assert!(matches!(db.insert(b"also lost", b"x"), Err(Error::WalUnavailable)));
        assert!(matches!(db.delete(&key(0)), Err(Error::WalUnavailable)));
        assert!(matches!(db.checkpoint(), Err(Error::WalUnavailable)));

        assert!(db.search(b"lost").unwrap_err().is_not_found());
        assert_eq!(db.search(&key(0)).unwrap(), b"committed");
        assert_eq!(db.len().unwrap(), 50);
        db.verify().unwrap();
        drop(db);

        let db = Database::open(&path, config()).unwrap();
        assert_eq!(db.len().unwrap(), 50);
        assert!(db.search(b"lost").unwrap_err().is_not_found());
        db.verify().unwrap();
    }

    #[test]
    fn test_interrupted_create_is_redone() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        std::fs::write(&path, b"").unwrap();
        std::fs::write(dir.path().join("db.tmp"), vec![0x11u8; 700]).unwrap();

        let db = Database::open(&path, config()).unwrap();
        assert!(!dir.path().join("db.tmp").exists());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 2 * 1024);
        db.insert(b"k", b"v").unwrap();
        db.close().unwrap();

        let db = Database::open(&path, config()).unwrap();
        assert_eq!(db.search(b"k").unwrap(), b"v");
    }

    #[test]
    fn test_verify_checks_data_pages() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("db"), config()).unwrap();
        for i in 0..20 {
            db.insert(&key(i), b"record").unwrap();
        }
        let summary = db.verify().unwrap();
        assert_eq!(summary.keys, 20);

        let data_page = *db.tree.walk().unwrap().data_pages.keys().next().unwrap();
        {
            let mut guard = db.bpm.fetch_page_write(data_page).unwrap();
            DataPage::new(guard.as_mut_slice()).insert(b"orphan").unwrap();
        }
        let err = db.verify().unwrap_err();
        assert!(matches!(err, Error::Corrupted { page_id, .. } if page_id == data_page));
    }

    #[test]
    fn test_new_log_starts_above_page_lsns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        {
            let db = Database::open(&path, config()).unwrap();
            for i in 0..30 {
                db.insert(&key(i), b"record").unwrap();
            }
            db.close().unwrap();
        }
        let stamped = PageStore::open(&path, 1024).unwrap().max_lsn().unwrap();
        assert!(stamped > Lsn::FIRST);

        let moved = config().with_wal_path(dir.path().join("moved.wal"));
        let db = Database::open(&path, moved).unwrap();
        assert_eq!(db.wal.last_lsn(), stamped);
    }
}
