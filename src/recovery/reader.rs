//! Sequential WAL reader.
//!
//! Reads the log from its first record. A truncated or corrupt record ends
//! the iteration; everything before it is returned.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use tracing::warn;

use crate::common::{Lsn, Result};

use super::record::{self, RecordHeader, WalRecord, RECORD_HEADER_LEN, RECORD_TRAILER_LEN};
use super::wal::WalHeader;

/// Iterator over the records of a WAL file.
///
/// Yields `Err` only for I/O failures; a damaged tail simply ends the
/// sequence and is reported through [`WalReader::stopped_early`].
pub struct WalReader {
    reader: BufReader<File>,
    page_size: usize,
    header: WalHeader,
    /// Offset just past the last record returned.
    offset: u64,
    last_lsn: Lsn,
    done: bool,
    stopped_early: bool,
}

impl WalReader {
    /// Open the log at `path` and validate its header.
    pub fn open<P: AsRef<Path>>(path: P, page_size: usize) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let header = WalHeader::read_from(&mut reader)?;
        Ok(Self {
            reader,
            page_size,
            header,
            offset: WalHeader::SIZE as u64,
            last_lsn: Lsn::ZERO,
            done: false,
            stopped_early: false,
        })
    }

    /// LSN the log starts at.
    pub fn base_lsn(&self) -> Lsn {
        self.header.base_lsn
    }

    /// File offset just past the last record returned so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// True if iteration ended on a damaged record rather than at end of file.
    pub fn stopped_early(&self) -> bool {
        self.stopped_early
    }

    fn stop(&mut self, reason: &str) {
        warn!(offset = self.offset, reason, "WAL ends at damaged record");
        self.done = true;
        self.stopped_early = true;
    }

    fn next_record(&mut self) -> io::Result<Option<WalRecord>> {
        let mut header_bytes = [0u8; RECORD_HEADER_LEN];
        match read_full(&mut self.reader, &mut header_bytes)? {
            0 => {
                self.done = true;
                return Ok(None);
            }
            n if n < RECORD_HEADER_LEN => {
                self.stop("truncated record header");
                return Ok(None);
            }
            _ => {}
        }

        let header = RecordHeader::parse(&header_bytes);
        if !header.has_valid_length(self.page_size) {
            self.stop("invalid payload length");
            return Ok(None);
        }

        let mut payload = vec![0u8; header.payload_length];
        let mut crc = [0u8; 4];
        if read_full(&mut self.reader, &mut payload)? < payload.len()
            || read_full(&mut self.reader, &mut crc)? < RECORD_TRAILER_LEN
        {
            self.stop("truncated record");
            return Ok(None);
        }

        match record::decode(&header_bytes, &payload, crc, self.page_size) {
            Ok(record) if record.lsn < self.header.base_lsn || record.lsn <= self.last_lsn => {
                self.stop("non-increasing lsn");
                Ok(None)
            }
            Ok(record) => {
                self.last_lsn = record.lsn;
                self.offset +=
                    (RECORD_HEADER_LEN + header.payload_length + RECORD_TRAILER_LEN) as u64;
                Ok(Some(record))
            }
            Err(reason) => {
                self.stop(&reason);
                Ok(None)
            }
        }
    }
}

impl Iterator for WalReader {
    type Item = Result<WalRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e.into()))
            }
        }
    }
}

/// Read until `buf` is full or the input ends; returns bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
