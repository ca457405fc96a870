//! Crash recovery: reapply committed page images from the WAL.

use tracing::{debug, info, warn};

use crate::common::{Lsn, PageId, Result};
use crate::storage::PageStore;

use super::record::WalPayload;
use super::wal::Wal;

/// Outcome of a recovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Records read from the log.
    pub records_scanned: u64,
    /// Committed groups found in the log.
    pub groups_applied: u64,
    /// Groups dropped because they never committed.
    pub groups_discarded: u64,
    /// Page images written to the page file.
    pub pages_written: u64,
}

/// Bring the page file up to date with every committed group in `wal`.
///
/// A page image is applied only if its LSN is newer than the one on disk,
/// so running recovery again over the same log changes nothing. Pages that
/// fail their checksum count as LSN 0 and are rewritten.
pub fn recover(store: &PageStore, wal: &Wal) -> Result<RecoveryReport> {
    let mut report = RecoveryReport {
        groups_discarded: u64::from(wal.discarded_on_open() > 0),
        ..RecoveryReport::default()
    };
    let mut pending: Vec<(Lsn, PageId, Box<[u8]>)> = Vec::new();

    for record in wal.replay()? {
        let record = record?;
        report.records_scanned += 1;

        match record.payload {
            WalPayload::PageImage(image) => pending.push((record.lsn, record.page_id, image)),
            WalPayload::Commit { records } => {
                if records as usize != pending.len() {
                    warn!(
                        lsn = %record.lsn,
                        expected = records,
                        found = pending.len(),
                        "commit record does not match its group; skipping group"
                    );
                    report.groups_discarded += 1;
                    pending.clear();
                    continue;
                }

                for (lsn, page_id, image) in pending.drain(..) {
                    if lsn > store.stored_lsn(page_id)? {
                        store.write_page(page_id, &image, lsn)?;
                        report.pages_written += 1;
                    }
                }
                report.groups_applied += 1;
            }
        }
    }

    if !pending.is_empty() {
        warn!(records = pending.len(), "ignoring uncommitted WAL group");
        report.groups_discarded += 1;
    }

    if report.pages_written > 0 {
        store.sync()?;
    }

    if report.records_scanned > 0 || report.groups_discarded > 0 {
        info!(
            scanned = report.records_scanned,
            applied = report.groups_applied,
            discarded = report.groups_discarded,
            pages = report.pages_written,
            "recovery complete"
        );
    } else {
        debug!("WAL empty; nothing to recover");
    }
    Ok(report)
}
