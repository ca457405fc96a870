//! WAL record format.
//!
//! ```text
//! ┌──────────┬─────────────┬───────────────────────┬──────────────┬─────────┐
//! │ lsn u64  │ page_id u64 │ payload_length u32    │ payload      │ crc32   │
//! └──────────┴─────────────┴───────────────────────┴──────────────┴─────────┘
//! ```
//!
//! The CRC covers everything before it. Payload byte 0 is the kind:
//! `1` page image (followed by the full page), `2` commit (followed by the
//! `u32` number of records in the group).

use crate::common::{Lsn, PageId};

/// Bytes before the payload.
pub const RECORD_HEADER_LEN: usize = 8 + 8 + 4;

/// Bytes after the payload.
pub const RECORD_TRAILER_LEN: usize = 4;

const KIND_PAGE_IMAGE: u8 = 1;
const KIND_COMMIT: u8 = 2;

/// Kind byte plus the `u32` record count.
const COMMIT_PAYLOAD_LEN: usize = 1 + 4;

/// What a record carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalPayload {
    /// Full contents of a page after a modification.
    PageImage(Box<[u8]>),
    /// Ends a group; the group is applied only once this is read.
    Commit { records: u32 },
}

/// One decoded log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    pub lsn: Lsn,
    pub page_id: PageId,
    pub payload: WalPayload,
}

/// Append an encoded page-image record to `out`.
pub fn encode_page_image(out: &mut Vec<u8>, lsn: Lsn, page_id: PageId, page: &[u8]) {
    encode(out, lsn, page_id, KIND_PAGE_IMAGE, page);
}

/// Append an encoded commit record to `out`.
pub fn encode_commit(out: &mut Vec<u8>, lsn: Lsn, records: u32) {
    encode(out, lsn, PageId::NONE, KIND_COMMIT, &records.to_be_bytes());
}

fn encode(out: &mut Vec<u8>, lsn: Lsn, page_id: PageId, kind: u8, body: &[u8]) {
    let start = out.len();
    out.extend_from_slice(&lsn.as_u64().to_be_bytes());
    out.extend_from_slice(&page_id.0.to_be_bytes());
    out.extend_from_slice(&((body.len() + 1) as u32).to_be_bytes());
    out.push(kind);
    out.extend_from_slice(body);
    let crc = crc32fast::hash(&out[start..]);
    out.extend_from_slice(&crc.to_be_bytes());
}

/// Encoded length of a page-image record for `page_size`-byte pages.
pub const fn page_image_len(page_size: usize) -> usize {
    RECORD_HEADER_LEN + 1 + page_size + RECORD_TRAILER_LEN
}

/// Parsed fixed-size record header.
#[derive(Debug, Clone, Copy)]
pub struct RecordHeader {
    pub lsn: Lsn,
    pub page_id: PageId,
    pub payload_length: usize,
}

impl RecordHeader {
    pub fn parse(buf: &[u8; RECORD_HEADER_LEN]) -> Self {
        let mut lsn = [0u8; 8];
        let mut page_id = [0u8; 8];
        let mut len = [0u8; 4];
        lsn.copy_from_slice(&buf[0..8]);
        page_id.copy_from_slice(&buf[8..16]);
        len.copy_from_slice(&buf[16..20]);
        Self {
            lsn: Lsn::new(u64::from_be_bytes(lsn)),
            page_id: PageId::new(u64::from_be_bytes(page_id)),
            payload_length: u32::from_be_bytes(len) as usize,
        }
    }

    /// Whether the length is one a writer for `page_size` pages produces.
    pub fn has_valid_length(&self, page_size: usize) -> bool {
        let record_len = RECORD_HEADER_LEN + self.payload_length + RECORD_TRAILER_LEN;
        record_len == page_image_len(page_size) || self.payload_length == COMMIT_PAYLOAD_LEN
    }
}

/// Verify the CRC of a whole record and decode its payload.
///
/// `header_bytes`, `payload` and `crc` are the three parts as read from the
/// log. Returns a reason when the record must be treated as the end of the
/// log.
pub fn decode(
    header_bytes: &[u8; RECORD_HEADER_LEN],
    payload: &[u8],
    crc: [u8; 4],
    page_size: usize,
) -> Result<WalRecord, String> {
    let header = RecordHeader::parse(header_bytes);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(header_bytes);
    hasher.update(payload);
    let computed = hasher.finalize();
    let stored = u32::from_be_bytes(crc);
    if computed != stored {
        return Err(format!(
            "record {} crc mismatch (stored {:#010x}, computed {:#010x})",
            header.lsn, stored, computed
        ));
    }

    let payload = match (payload.first().copied(), payload.len()) {
        (Some(KIND_PAGE_IMAGE), len) if len == 1 + page_size => {
            WalPayload::PageImage(payload[1..].to_vec().into_boxed_slice())
        }
        (Some(KIND_COMMIT), 5) => {
            let mut count = [0u8; 4];
            count.copy_from_slice(&payload[1..5]);
            WalPayload::Commit {
                records: u32::from_be_bytes(count),
            }
        }
        (kind, len) => {
            return Err(format!(
                "record {} has unknown kind {:?} with {} payload bytes",
                header.lsn, kind, len
            ))
        }
    };

    Ok(WalRecord {
        lsn: header.lsn,
        page_id: header.page_id,
        payload,
    })
}
