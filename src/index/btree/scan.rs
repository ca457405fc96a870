//! Lazy range scans over the leaf chain.

use std::collections::VecDeque;
use std::ops::Bound;

use crate::common::Result;

use super::tree::BTreeIndex;

/// Entries collected per descent before the iterator hands them out.
const BATCH_SIZE: usize = 64;

/// Iterator over `(key, record)` pairs in ascending key order.
///
/// Entries are gathered a batch at a time by walking the leaf chain with
/// latch coupling; no latch is held between calls to `next`. Each batch
/// resumes by descending to the last key returned, so the scan survives
/// concurrent splits and merges. If a writer holds the next leaf, the
/// batch ends early rather than wait while holding a latch.
pub struct RangeScan<'a> {
    tree: &'a BTreeIndex,
    lower: Bound<Vec<u8>>,
    upper: Bound<Vec<u8>>,
    buffer: VecDeque<(Vec<u8>, Vec<u8>)>,
    done: bool,
}

impl<'a> RangeScan<'a> {
    pub(crate) fn new(tree: &'a BTreeIndex, lower: Bound<Vec<u8>>, upper: Bound<Vec<u8>>) -> Self {
        let done = match (&lower, &upper) {
            (Bound::Included(lo), Bound::Included(hi)) => lo > hi,
            (Bound::Included(lo) | Bound::Excluded(lo), Bound::Excluded(hi))
            | (Bound::Excluded(lo), Bound::Included(hi)) => lo >= hi,
            _ => false,
        };
        Self {
            tree,
            lower,
            upper,
            buffer: VecDeque::new(),
            done,
        }
    }

    fn above_lower(&self, key: &[u8]) -> bool {
        match &self.lower {
            Bound::Included(lo) => key >= lo.as_slice(),
            Bound::Excluded(lo) => key > lo.as_slice(),
            Bound::Unbounded => true,
        }
    }

    fn below_upper(&self, key: &[u8]) -> bool {
        match &self.upper {
            Bound::Included(hi) => key <= hi.as_slice(),
            Bound::Excluded(hi) => key < hi.as_slice(),
            Bound::Unbounded => true,
        }
    }

    fn fill(&mut self) -> Result<()> {
        let start = match &self.lower {
            Bound::Included(key) | Bound::Excluded(key) => Some(key.as_slice()),
            Bound::Unbounded => None,
        };
        let mut guard = self.tree.descend_read(start)?;
        let mut stalled = false;

        loop {
            let node = BTreeIndex::read_node(&guard)?;
            for (key, rid) in node.keys.iter().zip(&node.records) {
                if !self.above_lower(key) {
                    continue;
                }
                if !self.below_upper(key) {
                    self.done = true;
                    break;
                }
                let record = self.tree.read_record(*rid)?;
                self.buffer.push_back((key.clone(), record));
            }

            if self.done {
                break;
            }
            if node.next_leaf.is_none() {
                self.done = true;
                break;
            }
            if self.buffer.len() >= BATCH_SIZE {
                break;
            }
            match self.tree.bpm().try_fetch_page_read(node.next_leaf)? {
                Some(next) => guard = next,
                None => {
                    stalled = true;
                    break;
                }
            }
        }
        drop(guard);

        if let Some((key, _)) = self.buffer.back() {
            self.lower = Bound::Excluded(key.clone());
        } else if stalled {
            std::thread::yield_now();
        }
        Ok(())
    }
}

impl Iterator for RangeScan<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.buffer.is_empty() && !self.done {
            if let Err(e) = self.fill() {
                self.done = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
