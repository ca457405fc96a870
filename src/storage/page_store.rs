//! Checksummed page I/O on top of the [`DiskManager`].

use std::collections::BTreeSet;
use std::path::Path;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::common::{Error, Lsn, PageId, Result};
use crate::storage::page::{
    stamp_checksum, stamp_lsn, MetadataPage, PageHeader, METADATA_PREFIX_LEN,
};
use crate::storage::DiskManager;

/// Reads and writes whole pages, verifying checksums on the way in and
/// stamping LSN and checksum on the way out.
///
/// Pages whose last read failed verification are remembered as suspect.
pub struct PageStore {
    disk: Mutex<DiskManager>,
    page_size: usize,
    suspect: Mutex<BTreeSet<PageId>>,
}

impl PageStore {
    /// Open (or create) the page file at `path`.
    ///
    /// A non-empty file must carry a valid metadata header declaring
    /// `page_size`, otherwise this fails with [`Error::Format`].
    pub fn open<P: AsRef<Path>>(path: P, page_size: usize) -> Result<Self> {
        let mut disk = DiskManager::open_or_create(path, page_size)?;

        if disk.file_len()? > 0 {
            let mut prefix = [0u8; METADATA_PREFIX_LEN];
            let n = disk.read_at(0, &mut prefix)?;
            let stored = MetadataPage::peek_page_size(&prefix[..n])?;
            if stored != page_size {
                return Err(Error::Format(format!(
                    "database uses {}-byte pages, opened with {}",
                    stored, page_size
                )));
            }
        }

        Ok(Self {
            disk: Mutex::new(disk),
            page_size,
            suspect: Mutex::new(BTreeSet::new()),
        })
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// True when the file holds no pages yet.
    pub fn is_empty(&self) -> bool {
        self.disk.lock().page_count() == 0
    }

    /// Number of whole pages in the file.
    pub fn page_count(&self) -> u64 {
        self.disk.lock().page_count()
    }

    /// Read and verify a page into `buf`.
    ///
    /// # Errors
    /// - `Error::OutOfRange` if the page lies past the end of the file
    /// - `Error::ChecksumMismatch` if the stored checksum is wrong; the page
    ///   is recorded as suspect
    /// - `Error::Corrupted` if the header names a different page
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        self.disk.lock().read_page(page_id, buf)?;

        let header = PageHeader::from_bytes(buf);
        let computed = PageHeader::compute_checksum(buf);
        if header.checksum != computed {
            warn!(%page_id, stored = header.checksum, computed, "page checksum mismatch");
            self.suspect.lock().insert(page_id);
            return Err(Error::ChecksumMismatch {
                page_id,
                stored: header.checksum,
                computed,
            });
        }
        if header.page_id != page_id {
            return Err(Error::corrupted(
                page_id,
                format!("header carries {}", header.page_id),
            ));
        }

        self.suspect.lock().remove(&page_id);
        Ok(())
    }

    /// Persist a page with `lsn` stamped into its header.
    ///
    /// The checksum is recomputed over the stamped bytes; `data` itself is
    /// not modified.
    pub fn write_page(&self, page_id: PageId, data: &[u8], lsn: Lsn) -> Result<()> {
        let mut out = data.to_vec();
        stamp_lsn(&mut out, lsn);
        stamp_checksum(&mut out);
        self.disk.lock().write_page(page_id, &out)
    }

    /// LSN stored on disk for `page_id`, or [`Lsn::ZERO`] if the page is
    /// missing or fails verification.
    pub fn stored_lsn(&self, page_id: PageId) -> Result<Lsn> {
        let mut buf = vec![0u8; self.page_size];
        match self.disk.lock().read_page(page_id, &mut buf) {
            Ok(()) => {}
            Err(Error::OutOfRange { .. }) => return Ok(Lsn::ZERO),
            Err(e) => return Err(e),
        }

        let header = PageHeader::from_bytes(&buf);
        if header.verify_checksum(&buf) && header.page_id == page_id {
            Ok(header.lsn)
        } else {
            debug!(%page_id, "torn or blank page on disk");
            Ok(Lsn::ZERO)
        }
    }

    /// Highest LSN stamped on any verified page in the file.
    ///
    /// Reads the whole file. Pages that fail verification are skipped.
    pub fn max_lsn(&self) -> Result<Lsn> {
        let mut disk = self.disk.lock();
        let mut buf = vec![0u8; self.page_size];
        let mut max = Lsn::ZERO;
        for page in 0..disk.page_count() {
            let page_id = PageId::new(page);
            disk.read_page(page_id, &mut buf)?;
            let header = PageHeader::from_bytes(&buf);
            if header.verify_checksum(&buf) && header.page_id == page_id {
                max = max.max(header.lsn);
            }
        }
        Ok(max)
    }

    /// Make sure the file has room for `page_id`.
    ///
    /// # Errors
    /// `Error::OutOfSpace` if the file cannot grow.
    pub fn reserve(&self, page_id: PageId) -> Result<()> {
        let mut disk = self.disk.lock();
        let total_pages = disk.page_count();
        disk.reserve(page_id.0 + 1).map_err(|source| Error::OutOfSpace {
            total_pages,
            source: Some(source),
        })
    }

    /// Flush the page file to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.disk.lock().sync()
    }

    /// Pages whose most recent read failed checksum verification.
    pub fn suspect_pages(&self) -> Vec<PageId> {
        self.suspect.lock().iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::{DataPage, Page};
    use tempfile::tempdir;

    const PAGE_SIZE: usize = 1024;

    fn data_page(page_id: PageId) -> Vec<u8> {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut page = DataPage::init(&mut buf[..], page_id);
        page.insert(b"payload").unwrap();
        buf
    }

    #[test]
    fn test_write_stamps_lsn_and_checksum() {
        let dir = tempdir().unwrap();
        let store = PageStore::open(dir.path().join("p.db"), PAGE_SIZE).unwrap();

        store
            .write_page(PageId::new(2), &data_page(PageId::new(2)), Lsn::new(9))
            .unwrap();

        let mut page = Page::new(PAGE_SIZE);
        store.read_page(PageId::new(2), page.as_mut_slice()).unwrap();
        assert_eq!(page.lsn(), Lsn::new(9));
        assert!(page.verify_checksum());
        assert_eq!(store.stored_lsn(PageId::new(2)).unwrap(), Lsn::new(9));

        // Unwritten hole below page 2
        assert_eq!(store.stored_lsn(PageId::new(1)).unwrap(), Lsn::ZERO);
        assert_eq!(store.stored_lsn(PageId::new(50)).unwrap(), Lsn::ZERO);
    }

    #[test]
    fn test_checksum_mismatch_marks_suspect() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("p.db");
        let store = PageStore::open(&path, PAGE_SIZE).unwrap();
        store
            .write_page(PageId::new(0), &data_page(PageId::new(0)), Lsn::new(1))
            .unwrap();
        store.sync().unwrap();

        let mut raw = std::fs::read(&path).unwrap();
        raw[500] ^= 0x01;
        std::fs::write(&path, &raw).unwrap();

        let mut buf = vec![0u8; PAGE_SIZE];
        let err = store.read_page(PageId::new(0), &mut buf).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { page_id, .. } if page_id == PageId::new(0)));
        assert_eq!(store.suspect_pages(), vec![PageId::new(0)]);
        assert_eq!(store.stored_lsn(PageId::new(0)).unwrap(), Lsn::ZERO);
    }

    #[test]
    fn test_misplaced_page_is_corrupted() {
        let dir = tempdir().unwrap();
        let store = PageStore::open(dir.path().join("p.db"), PAGE_SIZE).unwrap();
        store
            .write_page(PageId::new(3), &data_page(PageId::new(4)), Lsn::new(1))
            .unwrap();

        let mut buf = vec![0u8; PAGE_SIZE];
        let err = store.read_page(PageId::new(3), &mut buf).unwrap_err();
        assert!(matches!(err, Error::Corrupted { .. }));
    }

    #[test]
    fn test_open_rejects_foreign_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("p.db");
        std::fs::write(&path, vec![0x5Au8; 8192]).unwrap();

        assert!(matches!(
            PageStore::open(&path, PAGE_SIZE),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_open_rejects_page_size_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("p.db");
        {
            let store = PageStore::open(&path, PAGE_SIZE).unwrap();
            let mut buf = vec![0u8; PAGE_SIZE];
            MetadataPage::new(PAGE_SIZE).encode_into(&mut buf);
            store.write_page(PageId::METADATA, &buf, Lsn::ZERO).unwrap();
        }

        assert!(PageStore::open(&path, PAGE_SIZE).is_ok());
        assert!(matches!(
            PageStore::open(&path, 4096),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_max_lsn_skips_damaged_pages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("p.db");
        let store = PageStore::open(&path, PAGE_SIZE).unwrap();
        assert_eq!(store.max_lsn().unwrap(), Lsn::ZERO);

        store
            .write_page(PageId::new(0), &data_page(PageId::new(0)), Lsn::new(4))
            .unwrap();
        store
            .write_page(PageId::new(1), &data_page(PageId::new(1)), Lsn::new(30))
            .unwrap();
        store
            .write_page(PageId::new(3), &data_page(PageId::new(3)), Lsn::new(12))
            .unwrap();
        store.sync().unwrap();
        assert_eq!(store.max_lsn().unwrap(), Lsn::new(30));

        let mut raw = std::fs::read(&path).unwrap();
        raw[PAGE_SIZE + 600] ^= 0x01;
        std::fs::write(&path, &raw).unwrap();
        assert_eq!(store.max_lsn().unwrap(), Lsn::new(12));
    }

    #[test]
    fn test_reserve_grows_file() {
        let dir = tempdir().unwrap();
        let store = PageStore::open(dir.path().join("p.db"), PAGE_SIZE).unwrap();
        assert!(store.is_empty());

        store.reserve(PageId::new(4)).unwrap();
        assert_eq!(store.page_count(), 5);
    }
}
