//! The write-ahead log.
//!
//! A single append-only file next to the page file:
//!
//! ```text
//! ┌──────────────────── header (24 bytes) ────────────────────┐
//! │ magic "PWAL" │ version u32 │ base_lsn u64 │ crc u32 │ rsvd │
//! └────────────────────────────────────────────────────────────┘
//! record record record ... (see `record`)
//! ```
//!
//! Records are encoded into an in-memory tail under a short lock and
//! written out by [`Wal::flush`]. Concurrent committers share one write and
//! one fsync: whoever takes the file lock first writes everything buffered
//! so far, and the others find their LSN already durable.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::common::{Error, Lsn, PageId, Result, SyncPolicy};

use super::reader::WalReader;
use super::record::{self, WalPayload, WalRecord};

const WAL_MAGIC: u32 = u32::from_be_bytes(*b"PWAL");
const WAL_VERSION: u32 = 1;

/// The log file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalHeader {
    /// LSN of the first record the file may contain.
    pub base_lsn: Lsn,
}

impl WalHeader {
    pub const SIZE: usize = 24;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&WAL_MAGIC.to_be_bytes());
        buf[4..8].copy_from_slice(&WAL_VERSION.to_be_bytes());
        buf[8..16].copy_from_slice(&self.base_lsn.as_u64().to_be_bytes());
        let crc = crc32fast::hash(&buf[0..16]);
        buf[16..20].copy_from_slice(&crc.to_be_bytes());
        buf
    }

    /// Read and validate a header.
    ///
    /// # Errors
    /// `Error::Format` for a short file, wrong magic, version or checksum.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; Self::SIZE];
        reader.read_exact(&mut buf).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => Error::Format("WAL header truncated".to_string()),
            _ => Error::Io(e),
        })?;

        let field = |range: std::ops::Range<usize>| {
            let mut out = [0u8; 4];
            out.copy_from_slice(&buf[range]);
            u32::from_be_bytes(out)
        };
        if field(0..4) != WAL_MAGIC {
            return Err(Error::Format("not a WAL file".to_string()));
        }
        if field(4..8) != WAL_VERSION {
            return Err(Error::Format(format!(
                "unsupported WAL version {}",
                field(4..8)
            )));
        }
        if field(16..20) != crc32fast::hash(&buf[0..16]) {
            return Err(Error::Format("WAL header checksum mismatch".to_string()));
        }

        let mut base = [0u8; 8];
        base.copy_from_slice(&buf[8..16]);
        Ok(Self {
            base_lsn: Lsn::new(u64::from_be_bytes(base)),
        })
    }
}

/// Counters maintained by the log.
#[derive(Debug, Default)]
pub struct WalStats {
    pub records_appended: AtomicU64,
    pub commits: AtomicU64,
    pub bytes_written: AtomicU64,
    pub writes: AtomicU64,
    pub syncs: AtomicU64,
}

/// A point-in-time copy of [`WalStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalStatsSnapshot {
    pub records_appended: u64,
    pub commits: u64,
    pub bytes_written: u64,
    /// Batched writes issued by `flush`; fewer than `commits` under
    /// concurrent load.
    pub writes: u64,
    pub syncs: u64,
}

impl WalStats {
    pub fn snapshot(&self) -> WalStatsSnapshot {
        WalStatsSnapshot {
            records_appended: self.records_appended.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            syncs: self.syncs.load(Ordering::Relaxed),
        }
    }
}

/// Records encoded but not yet written.
struct LogTail {
    next_lsn: Lsn,
    buffer: Vec<u8>,
    /// Highest LSN held in `buffer`.
    buffered_through: Lsn,
}

/// The open file and its length.
struct LogSink {
    file: File,
    len: u64,
    #[cfg(test)]
    fail_writes: bool,
}

impl LogSink {
    fn new(file: File, len: u64) -> Self {
        Self {
            file,
            len,
            #[cfg(test)]
            fail_writes: false,
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        #[cfg(test)]
        if self.fail_writes {
            return Err(io::Error::new(io::ErrorKind::Other, "injected write failure"));
        }
        self.file.write_all(buf)?;
        self.len += buf.len() as u64;
        Ok(())
    }
}

/// The write-ahead log.
pub struct Wal {
    path: PathBuf,
    page_size: usize,
    sync_policy: SyncPolicy,
    /// Lock order: `sink` before `tail`.
    sink: Mutex<LogSink>,
    tail: Mutex<LogTail>,
    durable_lsn: AtomicU64,
    failed: AtomicBool,
    discarded_on_open: u64,
    stats: WalStats,
}

impl Wal {
    /// Open the log at `path`, creating it if missing or empty.
    ///
    /// Records after the last commit record are cut off: they belong to a
    /// group that never committed, or are the damaged tail of a crash.
    pub fn open<P: AsRef<Path>>(
        path: P,
        page_size: usize,
        sync_policy: SyncPolicy,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let existing_len = match std::fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };

        if existing_len == 0 {
            Self::write_fresh(&path, Lsn::FIRST)?;
            let file = OpenOptions::new().append(true).open(&path)?;
            return Ok(Self::from_parts(
                path,
                page_size,
                sync_policy,
                file,
                WalHeader::SIZE as u64,
                Lsn::FIRST,
                0,
            ));
        }

        let mut reader = WalReader::open(&path, page_size)?;
        let base_lsn = reader.base_lsn();
        let mut committed_end = reader.offset();
        let mut last_committed = Lsn::new(base_lsn.as_u64().saturating_sub(1));
        let mut pending = 0u64;

        while let Some(record) = reader.next() {
            let record = record?;
            match record.payload {
                WalPayload::PageImage(_) => pending += 1,
                WalPayload::Commit { .. } => {
                    pending = 0;
                    last_committed = record.lsn;
                    committed_end = reader.offset();
                }
            }
        }

        let file = OpenOptions::new().append(true).open(&path)?;
        if existing_len > committed_end {
            warn!(
                path = %path.display(),
                records = pending,
                bytes = existing_len - committed_end,
                "discarding WAL records after the last commit"
            );
            file.set_len(committed_end)?;
            file.sync_all()?;
        }

        debug!(path = %path.display(), %base_lsn, %last_committed, "opened WAL");
        Ok(Self::from_parts(
            path,
            page_size,
            sync_policy,
            file,
            committed_end,
            last_committed.next(),
            pending,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn from_parts(
        path: PathBuf,
        page_size: usize,
        sync_policy: SyncPolicy,
        file: File,
        len: u64,
        next_lsn: Lsn,
        discarded_on_open: u64,
    ) -> Self {
        Self {
            path,
            page_size,
            sync_policy,
            sink: Mutex::new(LogSink::new(file, len)),
            tail: Mutex::new(LogTail {
                next_lsn,
                buffer: Vec::new(),
                buffered_through: Lsn::new(next_lsn.as_u64() - 1),
            }),
            durable_lsn: AtomicU64::new(next_lsn.as_u64() - 1),
            failed: AtomicBool::new(false),
            discarded_on_open,
            stats: WalStats::default(),
        }
    }

    /// Write a file holding only a header, then sync it.
    fn write_fresh(path: &Path, base_lsn: Lsn) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(&WalHeader { base_lsn }.to_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Uncommitted records cut off when the log was opened.
    pub fn discarded_on_open(&self) -> u64 {
        self.discarded_on_open
    }

    /// Highest LSN handed out so far.
    pub fn last_lsn(&self) -> Lsn {
        Lsn::new(self.tail.lock().next_lsn.as_u64() - 1)
    }

    /// Highest LSN known to be written (and synced, under
    /// [`SyncPolicy::Always`]).
    pub fn durable_lsn(&self) -> Lsn {
        Lsn::new(self.durable_lsn.load(Ordering::Acquire))
    }

    /// Bytes in the log file plus bytes still buffered.
    pub fn size(&self) -> u64 {
        let sink = self.sink.lock();
        let tail = self.tail.lock();
        sink.len + tail.buffer.len() as u64
    }

    pub fn stats(&self) -> WalStatsSnapshot {
        self.stats.snapshot()
    }

    fn check_available(&self) -> Result<()> {
        if self.failed.load(Ordering::Acquire) {
            Err(Error::WalUnavailable)
        } else {
            Ok(())
        }
    }

    /// Make every later write to the file fail, as a full or failing disk
    /// would.
    #[cfg(test)]
    pub(crate) fn fail_writes(&self) {
        self.sink.lock().fail_writes = true;
    }

    /// Ensure every LSN handed out from now on is above `floor`.
    ///
    /// The page file may carry LSNs the log has never seen, for example
    /// when the log was deleted or moved after a checkpoint. New records
    /// must still sort above every stamped page or replay would skip them.
    /// Call only while the log holds no records.
    pub fn advance_past(&self, floor: Lsn) -> Result<()> {
        if self.last_lsn() >= floor {
            return Ok(());
        }
        warn!(
            path = %self.path.display(),
            last_lsn = %self.last_lsn(),
            %floor,
            "page file is ahead of the WAL; rebasing log"
        );
        self.truncate_through(floor)
    }

    /// Refuse all further writes after an I/O failure.
    fn poison(&self, e: io::Error) -> Error {
        error!(path = %self.path.display(), error = %e, "WAL write failed; log is now read-only");
        self.failed.store(true, Ordering::Release);
        Error::Io(e)
    }

    /// Append a page image record. Returns its LSN.
    ///
    /// The record belongs to the group closed by the next commit record.
    pub fn append(&self, page_id: PageId, page: &[u8]) -> Result<Lsn> {
        self.check_available()?;
        debug_assert_eq!(page.len(), self.page_size);

        let mut tail = self.tail.lock();
        let lsn = tail.next_lsn;
        record::encode_page_image(&mut tail.buffer, lsn, page_id, page);
        tail.next_lsn = lsn.next();
        tail.buffered_through = lsn;

        self.stats.records_appended.fetch_add(1, Ordering::Relaxed);
        Ok(lsn)
    }

    /// Append a commit record closing a group of `records` page images.
    pub fn append_commit(&self, records: u32) -> Result<Lsn> {
        self.check_available()?;

        let mut tail = self.tail.lock();
        let lsn = tail.next_lsn;
        record::encode_commit(&mut tail.buffer, lsn, records);
        tail.next_lsn = lsn.next();
        tail.buffered_through = lsn;

        self.stats.records_appended.fetch_add(1, Ordering::Relaxed);
        self.stats.commits.fetch_add(1, Ordering::Relaxed);
        Ok(lsn)
    }

    /// Append page images followed by their commit record as one
    /// contiguous run.
    ///
    /// Returns the LSN of each image, in order, and the commit LSN.
    pub fn append_group(&self, pages: &[(PageId, &[u8])]) -> Result<(Vec<Lsn>, Lsn)> {
        self.check_available()?;

        let mut tail = self.tail.lock();
        let mut lsns = Vec::with_capacity(pages.len());
        for (page_id, page) in pages {
            debug_assert_eq!(page.len(), self.page_size);
            let lsn = tail.next_lsn;
            record::encode_page_image(&mut tail.buffer, lsn, *page_id, page);
            tail.next_lsn = lsn.next();
            lsns.push(lsn);
        }

        let commit_lsn = tail.next_lsn;
        record::encode_commit(&mut tail.buffer, commit_lsn, pages.len() as u32);
        tail.next_lsn = commit_lsn.next();
        tail.buffered_through = commit_lsn;

        self.stats
            .records_appended
            .fetch_add(pages.len() as u64 + 1, Ordering::Relaxed);
        self.stats.commits.fetch_add(1, Ordering::Relaxed);
        Ok((lsns, commit_lsn))
    }

    /// Make every record up to `up_to` durable.
    ///
    /// Writes everything buffered at the time the file lock is taken, so one
    /// call covers all committers that appended before it.
    pub fn flush(&self, up_to: Lsn) -> Result<()> {
        self.check_available()?;
        if up_to.as_u64() <= self.durable_lsn.load(Ordering::Acquire) {
            return Ok(());
        }

        let mut sink = self.sink.lock();
        if up_to.as_u64() <= self.durable_lsn.load(Ordering::Acquire) {
            return Ok(());
        }
        self.check_available()?;

        let (buffer, through) = {
            let mut tail = self.tail.lock();
            (std::mem::take(&mut tail.buffer), tail.buffered_through)
        };

        if !buffer.is_empty() {
            sink.write(&buffer).map_err(|e| self.poison(e))?;
            self.stats.writes.fetch_add(1, Ordering::Relaxed);
            self.stats
                .bytes_written
                .fetch_add(buffer.len() as u64, Ordering::Relaxed);
        }

        if self.sync_policy == SyncPolicy::Always {
            sink.file.sync_data().map_err(|e| self.poison(e))?;
            self.stats.syncs.fetch_add(1, Ordering::Relaxed);
        }

        self.durable_lsn.fetch_max(through.as_u64(), Ordering::AcqRel);
        Ok(())
    }

    /// Read the log from its first record.
    ///
    /// Sees only records already written by [`flush`](Self::flush).
    pub fn replay(&self) -> Result<WalReader> {
        WalReader::open(&self.path, self.page_size)
    }

    /// Drop every record with an LSN at or below `through`.
    ///
    /// The surviving records are copied to a new file that atomically
    /// replaces the old one. Call only once all pages up to `through` are
    /// safely in the page file.
    pub fn truncate_through(&self, through: Lsn) -> Result<()> {
        self.check_available()?;

        let mut sink = self.sink.lock();
        let mut tail = self.tail.lock();

        if !tail.buffer.is_empty() {
            sink.write(&tail.buffer).map_err(|e| self.poison(e))?;
            tail.buffer.clear();
        }

        let base_lsn = through.next();
        let mut out = WalHeader { base_lsn }.to_bytes().to_vec();
        let mut kept = 0u64;
        for record in WalReader::open(&self.path, self.page_size)? {
            let record = record?;
            if record.lsn > through {
                encode_record(&mut out, &record);
                kept += 1;
            }
        }

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let rewrite = || -> io::Result<File> {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&out)?;
            tmp.sync_all()?;
            std::fs::rename(&tmp_path, &self.path)?;
            if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                File::open(dir)?.sync_all()?;
            }
            OpenOptions::new().append(true).open(&self.path)
        };
        sink.file = rewrite().map_err(|e| self.poison(e))?;
        sink.len = out.len() as u64;

        if tail.next_lsn <= through {
            tail.next_lsn = base_lsn;
        }
        let written_through = tail.next_lsn.as_u64() - 1;
        tail.buffered_through = Lsn::new(written_through);
        self.durable_lsn.fetch_max(written_through, Ordering::AcqRel);

        info!(%through, kept, bytes = sink.len, "truncated WAL");
        Ok(())
    }
}

/// Re-encode a decoded record.
fn encode_record(out: &mut Vec<u8>, record: &WalRecord) {
    match &record.payload {
        WalPayload::PageImage(page) => {
            record::encode_page_image(out, record.lsn, record.page_id, page)
        }
        WalPayload::Commit { records } => record::encode_commit(out, record.lsn, *records),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PAGE_SIZE: usize = 512;

    fn page(fill: u8) -> Vec<u8> {
        vec![fill; PAGE_SIZE]
    }

    fn collect(wal: &Wal) -> Vec<WalRecord> {
        wal.replay()
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_header_roundtrip_and_rejects() {
        let header = WalHeader {
            base_lsn: Lsn::new(42),
        };
        let bytes = header.to_bytes();
        assert_eq!(WalHeader::read_from(&mut &bytes[..]).unwrap(), header);

        let mut bad = bytes;
        bad[0] ^= 0xFF;
        assert!(matches!(
            WalHeader::read_from(&mut &bad[..]),
            Err(Error::Format(_))
        ));

        let mut bad = bytes;
        bad[9] ^= 0x01;
        assert!(matches!(
            WalHeader::read_from(&mut &bad[..]),
            Err(Error::Format(_))
        ));

        assert!(matches!(
            WalHeader::read_from(&mut &bytes[..10]),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_append_flush_replay() {
        let dir = tempdir().unwrap();
        let wal = Wal::open(dir.path().join("db-wal"), PAGE_SIZE, SyncPolicy::Always).unwrap();

        let (lsns, commit) = wal
            .append_group(&[
                (PageId::new(1), page(1).as_slice()),
                (PageId::new(2), page(2).as_slice()),
            ])
            .unwrap();
        assert_eq!(lsns, vec![Lsn::new(1), Lsn::new(2)]);
        assert_eq!(commit, Lsn::new(3));
        assert_eq!(wal.durable_lsn(), Lsn::ZERO);

        // Nothing reaches the file before flush.
        assert!(collect(&wal).is_empty());

        wal.flush(commit).unwrap();
        assert_eq!(wal.durable_lsn(), commit);

        let records = collect(&wal);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].page_id, PageId::new(1));
        assert_eq!(records[0].payload, WalPayload::PageImage(page(1).into()));
        assert_eq!(records[2].payload, WalPayload::Commit { records: 2 });

        let stats = wal.stats();
        assert_eq!(stats.records_appended, 3);
        assert_eq!(stats.commits, 1);
        assert_eq!(stats.syncs, 1);
    }

    #[test]
    fn test_flush_is_idempotent() {
        let dir = tempdir().unwrap();
        let wal = Wal::open(dir.path().join("db-wal"), PAGE_SIZE, SyncPolicy::Always).unwrap();

        let lsn = wal.append(PageId::new(1), page(7).as_slice()).unwrap();
        let commit = wal.append_commit(1).unwrap();
        wal.flush(commit).unwrap();
        wal.flush(lsn).unwrap();
        wal.flush(commit).unwrap();

        assert_eq!(wal.stats().writes, 1);
        assert_eq!(collect(&wal).len(), 2);
    }

    #[test]
    fn test_reopen_discards_uncommitted_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db-wal");

        {
            let wal = Wal::open(&path, PAGE_SIZE, SyncPolicy::Always).unwrap();
            let (_, commit) = wal.append_group(&[(PageId::new(1), page(1).as_slice())]).unwrap();
            wal.flush(commit).unwrap();

            let dangling = wal.append(PageId::new(2), page(2).as_slice()).unwrap();
            wal.flush(dangling).unwrap();
        }

        let wal = Wal::open(&path, PAGE_SIZE, SyncPolicy::Always).unwrap();
        assert_eq!(wal.discarded_on_open(), 1);
        assert_eq!(wal.last_lsn(), Lsn::new(2));
        assert_eq!(collect(&wal).len(), 2);

        // New records continue after the last commit.
        let lsn = wal.append(PageId::new(3), page(3).as_slice()).unwrap();
        assert_eq!(lsn, Lsn::new(3));
    }

    #[test]
    fn test_garbage_tail_ends_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db-wal");

        {
            let wal = Wal::open(&path, PAGE_SIZE, SyncPolicy::Always).unwrap();
            let (_, commit) = wal.append_group(&[(PageId::new(1), page(1).as_slice())]).unwrap();
            wal.flush(commit).unwrap();
        }
        let clean_len = std::fs::metadata(&path).unwrap().len();
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[0xAB; 100]).unwrap();
        }

        let wal = Wal::open(&path, PAGE_SIZE, SyncPolicy::Always).unwrap();
        assert_eq!(collect(&wal).len(), 2);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), clean_len);
    }

    #[test]
    fn test_truncate_keeps_later_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db-wal");
        let wal = Wal::open(&path, PAGE_SIZE, SyncPolicy::Never).unwrap();

        let (_, first) = wal.append_group(&[(PageId::new(1), page(1).as_slice())]).unwrap();
        let (_, second) = wal.append_group(&[(PageId::new(2), page(2).as_slice())]).unwrap();
        wal.flush(second).unwrap();

        let before = wal.size();
        wal.truncate_through(first).unwrap();
        assert!(wal.size() < before);

        let records = collect(&wal);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].lsn, Lsn::new(3));
        assert_eq!(wal.replay().unwrap().base_lsn(), Lsn::new(3));

        wal.truncate_through(second).unwrap();
        assert!(collect(&wal).is_empty());
        assert_eq!(wal.size(), WalHeader::SIZE as u64);

        // LSNs keep increasing across truncation and reopen.
        drop(wal);
        let wal = Wal::open(&path, PAGE_SIZE, SyncPolicy::Never).unwrap();
        assert_eq!(wal.append_commit(0).unwrap(), Lsn::new(5));
    }

    #[test]
    fn test_advance_past_rebases_empty_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db-wal");
        let wal = Wal::open(&path, PAGE_SIZE, SyncPolicy::Never).unwrap();
        assert_eq!(wal.last_lsn(), Lsn::ZERO);

        wal.advance_past(Lsn::new(40)).unwrap();
        assert_eq!(wal.last_lsn(), Lsn::new(40));
        assert_eq!(wal.size(), WalHeader::SIZE as u64);

        // A lower floor changes nothing.
        wal.advance_past(Lsn::new(7)).unwrap();
        let (lsns, commit) = wal.append_group(&[(PageId::new(1), page(1).as_slice())]).unwrap();
        assert_eq!(lsns, vec![Lsn::new(41)]);
        wal.flush(commit).unwrap();

        drop(wal);
        let wal = Wal::open(&path, PAGE_SIZE, SyncPolicy::Never).unwrap();
        assert_eq!(wal.replay().unwrap().base_lsn(), Lsn::new(41));
        assert_eq!(collect(&wal)[0].lsn, Lsn::new(41));
    }

    #[test]
    fn test_write_failure_poisons_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db-wal");
        let wal = Wal::open(&path, PAGE_SIZE, SyncPolicy::Always).unwrap();

        let (_, first) = wal.append_group(&[(PageId::new(1), page(1).as_slice())]).unwrap();
        wal.flush(first).unwrap();

        wal.fail_writes();
        let (_, second) = wal.append_group(&[(PageId::new(2), page(2).as_slice())]).unwrap();
        assert!(matches!(wal.flush(second), Err(Error::Io(_))));
        assert_eq!(wal.durable_lsn(), first);

        assert!(matches!(
            wal.append(PageId::new(3), page(3).as_slice()),
            Err(Error::WalUnavailable)
        ));
        assert!(matches!(wal.flush(second), Err(Error::WalUnavailable)));
        assert!(matches!(wal.truncate_through(first), Err(Error::WalUnavailable)));

        // Reads still see what reached the file.
        assert_eq!(collect(&wal).len(), 2);

        drop(wal);
        let wal = Wal::open(&path, PAGE_SIZE, SyncPolicy::Always).unwrap();
        assert_eq!(wal.last_lsn(), first);
        assert_eq!(collect(&wal).len(), 2);
    }

    #[test]
    fn test_concurrent_group_commit() {
        use std::sync::Arc;
        use std::thread;

        let dir = tempdir().unwrap();
        let wal = Arc::new(
            Wal::open(dir.path().join("db-wal"), PAGE_SIZE, SyncPolicy::Always).unwrap(),
        );

        let handles: Vec<_> = (0..4u8)
            .map(|t| {
                let wal = Arc::clone(&wal);
                thread::spawn(move || {
                    for i in 0..25u64 {
                        let image = page(t);
                        let (_, commit) = wal
                            .append_group(&[(PageId::new(i + 1), image.as_slice())])
                            .unwrap();
                        wal.flush(commit).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let records = collect(&wal);
        assert_eq!(records.len(), 200);
        assert!(records.windows(2).all(|w| w[0].lsn < w[1].lsn));
        assert_eq!(wal.stats().commits, 100);
        assert!(wal.stats().writes <= 100);
    }
}
