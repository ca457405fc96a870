//! B+Tree over index pages, with records stored in data pages.
//!
//! # Latching
//! Readers descend with latch coupling: the child's read latch is taken
//! before the parent's is dropped. Writers descend holding write latches
//! inside a [`MiniTxn`] and release every ancestor as soon as the current
//! node is safe, meaning the operation cannot split or merge past it.
//! The in-memory root id doubles as the root latch; a writer holds it only
//! while the root itself may change.
//!
//! Writers take latches in a fixed order: index pages top-down, then the
//! data page, then the metadata page, then freelist pages, then pages
//! being allocated. Frees are deferred until the tree work is done so
//! that this order holds for deletes too.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::buffer::{BufferPoolManager, PageReadGuard};
use crate::common::{Error, PageId, RecordId, Result};
use crate::recovery::{MiniTxn, Wal};
use crate::storage::page::{max_key_len, max_record_len, DataPage, IndexNode};
use crate::storage::PageAccess;

use super::scan::RangeScan;

/// Shape of the tree as found by [`BTreeIndex::verify`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeSummary {
    /// Levels, counting the root; 1 for a lone leaf.
    pub height: usize,
    pub internal_pages: usize,
    pub leaf_pages: usize,
    /// Distinct data pages referenced by leaves.
    pub data_pages: usize,
    pub keys: usize,
}

/// Everything a verification pass saw.
#[derive(Debug, Default)]
pub(crate) struct TreeWalk {
    pub summary: TreeSummary,
    /// Index pages in visiting order.
    pub index_pages: Vec<PageId>,
    /// Leaves left to right.
    pub leaves: Vec<PageId>,
    /// Data pages with the number of leaf entries pointing into each.
    pub data_pages: BTreeMap<PageId, usize>,
}

/// An ordered map from byte keys to byte records.
pub struct BTreeIndex {
    bpm: Arc<BufferPoolManager>,
    wal: Arc<Wal>,
    root: RwLock<PageId>,
    max_pages: Option<u64>,
}

pub(crate) fn decode_node(page_id: PageId, data: &[u8]) -> Result<IndexNode> {
    let node = IndexNode::decode(data).map_err(|reason| Error::corrupted(page_id, reason))?;
    if node.page_id != page_id {
        return Err(Error::corrupted(
            page_id,
            format!("header carries {}", node.page_id),
        ));
    }
    Ok(node)
}

impl BTreeIndex {
    pub fn new(
        bpm: Arc<BufferPoolManager>,
        wal: Arc<Wal>,
        root: PageId,
        max_pages: Option<u64>,
    ) -> Self {
        Self {
            bpm,
            wal,
            root: RwLock::new(root),
            max_pages,
        }
    }

    pub fn root(&self) -> PageId {
        *self.root.read()
    }

    fn page_size(&self) -> usize {
        self.bpm.page_size()
    }

    pub(crate) fn bpm(&self) -> &BufferPoolManager {
        &self.bpm
    }

    fn begin(&self) -> MiniTxn<'_> {
        MiniTxn::new(&self.bpm, &self.wal, self.max_pages)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub(crate) fn read_node(guard: &PageReadGuard<'_>) -> Result<IndexNode> {
        decode_node(guard.page_id(), guard.as_slice())
    }

    /// Latch-coupled descent to the leaf that would hold `key`, or the
    /// leftmost leaf for `None`.
    pub(crate) fn descend_read(&self, key: Option<&[u8]>) -> Result<PageReadGuard<'_>> {
        let mut guard = {
            let root = self.root.read();
            self.bpm.fetch_page_read(*root)?
        };

        loop {
            let node = Self::read_node(&guard)?;
            if node.is_leaf {
                return Ok(guard);
            }
            let child = match key {
                Some(key) => node.child_for(key),
                None => node.children[0],
            };
            guard = self.bpm.fetch_page_read(child)?;
        }
    }

    /// Copy out the record at `rid`.
    pub(crate) fn read_record(&self, rid: RecordId) -> Result<Vec<u8>> {
        let guard = self.bpm.fetch_page_read(rid.page_id)?;
        let page = DataPage::new(guard.as_slice());
        page.validate()
            .map_err(|reason| Error::corrupted(rid.page_id, reason))?;
        page.record(rid.slot)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| {
                Error::corrupted(rid.page_id, format!("slot {} is not a live record", rid.slot))
            })
    }

    /// Look up the record stored under `key`.
    ///
    /// # Errors
    /// `Error::KeyNotFound` if the key is absent.
    pub fn search(&self, key: &[u8]) -> Result<Vec<u8>> {
        let leaf = self.descend_read(Some(key))?;
        let node = Self::read_node(&leaf)?;
        match node.search(key) {
            Ok(pos) => self.read_record(node.records[pos]),
            Err(_) => Err(Error::KeyNotFound),
        }
    }

    /// Entries with keys between `lower` and `upper`, in ascending order.
    pub fn range(&self, lower: Bound<Vec<u8>>, upper: Bound<Vec<u8>>) -> RangeScan<'_> {
        RangeScan::new(self, lower, upper)
    }

    // ========================================================================
    // Insert
    // ========================================================================

    fn txn_node(txn: &mut MiniTxn<'_>, page_id: PageId) -> Result<IndexNode> {
        let data = txn.page(page_id)?;
        decode_node(page_id, data)
    }

    fn write_node(txn: &mut MiniTxn<'_>, node: &IndexNode) -> Result<()> {
        node.encode_into(txn.page_mut(node.page_id)?);
        Ok(())
    }

    /// Insert `key` with `record`.
    ///
    /// # Errors
    /// - `Error::DuplicateKey` if the key is already present
    /// - `Error::KeyTooLarge` / `Error::RecordTooLarge` for oversized input
    /// - `Error::OutOfSpace` if a page is needed and the file cannot grow
    pub fn insert(&self, key: &[u8], record: &[u8]) -> Result<()> {
        let page_size = self.page_size();
        let max_key = max_key_len(page_size);
        if key.len() > max_key {
            return Err(Error::KeyTooLarge {
                len: key.len(),
                max: max_key,
            });
        }
        let max_record = max_record_len(page_size);
        if record.len() > max_record {
            return Err(Error::RecordTooLarge {
                len: record.len(),
                max: max_record,
            });
        }

        let mut txn = self.begin();
        let root_lock = self.root.write();
        let mut current = *root_lock;
        let mut root_lock = Some(root_lock);

        // Retained ancestors, topmost first; the last entry is the leaf.
        let mut path: Vec<IndexNode> = Vec::new();
        loop {
            let node = Self::txn_node(&mut txn, current)?;
            if node.is_insert_safe(page_size) {
                for ancestor in path.drain(..) {
                    txn.release(ancestor.page_id);
                }
                root_lock = None;
            }
            let child = (!node.is_leaf).then(|| node.child_for(key));
            path.push(node);
            match child {
                Some(child) => current = child,
                None => break,
            }
        }

        let mut node = path
            .pop()
            .ok_or_else(|| Error::corrupted(current, "descent found no leaf"))?;
        let pos = match node.search(key) {
            Ok(_) => return Err(Error::DuplicateKey),
            Err(pos) => pos,
        };

        let rid = self.store_record(&mut txn, &node, pos, record)?;
        node.insert_record(pos, key.to_vec(), rid);

        let mut new_root = None;
        loop {
            if node.fits(page_size) {
                Self::write_node(&mut txn, &node)?;
                break;
            }

            let right_id = txn.allocate_page()?;
            let (separator, right) = node.split(right_id);
            Self::write_node(&mut txn, &node)?;
            Self::write_node(&mut txn, &right)?;
            debug!(left = %node.page_id, right = %right_id, leaf = node.is_leaf, "split node");

            match path.pop() {
                Some(mut parent) => {
                    parent.insert_child(separator, right_id);
                    node = parent;
                }
                None => {
                    if root_lock.is_none() {
                        return Err(Error::corrupted(
                            node.page_id,
                            "split propagated past a released ancestor",
                        ));
                    }
                    let root_id = txn.allocate_page()?;
                    let mut root = IndexNode::new_internal(root_id, node.page_id);
                    root.insert_child(separator, right_id);
                    Self::write_node(&mut txn, &root)?;

                    let mut meta = txn.metadata()?;
                    meta.root = root_id;
                    txn.set_metadata(&meta)?;
                    debug!(root = %root_id, "tree grew a level");
                    new_root = Some(root_id);
                    break;
                }
            }
        }

        txn.commit()?;
        if let (Some(root_id), Some(lock)) = (new_root, root_lock.as_mut()) {
            **lock = root_id;
        }
        Ok(())
    }

    /// Place `record` in a data page, preferring the page that holds a
    /// neighbouring key's record.
    fn store_record(
        &self,
        txn: &mut MiniTxn<'_>,
        leaf: &IndexNode,
        pos: usize,
        record: &[u8],
    ) -> Result<RecordId> {
        let neighbour = pos
            .checked_sub(1)
            .and_then(|i| leaf.records.get(i))
            .or_else(|| leaf.records.get(pos))
            .map(|rid| rid.page_id);

        if let Some(page_id) = neighbour {
            let fits = {
                let page = DataPage::new(txn.page(page_id)?);
                page.validate()
                    .map_err(|reason| Error::corrupted(page_id, reason))?;
                page.can_insert(record.len())
            };
            if fits {
                let slot = DataPage::new(txn.page_mut(page_id)?)
                    .insert(record)
                    .ok_or_else(|| Error::corrupted(page_id, "record did not fit"))?;
                return Ok(RecordId::new(page_id, slot));
            }
            txn.release(page_id);
        }

        let page_id = txn.allocate_page()?;
        let slot = DataPage::init(txn.page_mut(page_id)?, page_id)
            .insert(record)
            .ok_or_else(|| Error::corrupted(page_id, "record did not fit in an empty page"))?;
        debug!(%page_id, "new data page");
        Ok(RecordId::new(page_id, slot))
    }

    // ========================================================================
    // Delete
    // ========================================================================

    /// Remove `key` and its record.
    ///
    /// # Errors
    /// `Error::KeyNotFound` if the key is absent.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let page_size = self.page_size();

        let mut txn = self.begin();
        let root_lock = self.root.write();
        let root_id = *root_lock;
        let mut root_lock = Some(root_lock);

        let mut path: Vec<IndexNode> = Vec::new();
        let mut current = root_id;
        loop {
            let node = Self::txn_node(&mut txn, current)?;
            let safe = if node.page_id == root_id {
                node.is_leaf || node.keys.len() > 1
            } else {
                node.is_delete_safe(page_size)
            };
            if safe {
                for ancestor in path.drain(..) {
                    txn.release(ancestor.page_id);
                }
                root_lock = None;
            }
            let child = (!node.is_leaf).then(|| node.child_for(key));
            path.push(node);
            match child {
                Some(child) => current = child,
                None => break,
            }
        }

        let mut node = path
            .pop()
            .ok_or_else(|| Error::corrupted(current, "descent found no leaf"))?;
        let pos = node.search(key).map_err(|_| Error::KeyNotFound)?;
        let (_, rid) = node.remove_record(pos);

        let mut frees = Vec::new();
        let mut new_root = None;

        loop {
            let Some(mut parent) = path.pop() else {
                let collapses = root_lock.is_some()
                    && node.page_id == root_id
                    && !node.is_leaf
                    && node.keys.is_empty();
                if collapses {
                    new_root = Some(node.children[0]);
                    frees.push(node.page_id);
                } else {
                    Self::write_node(&mut txn, &node)?;
                }
                break;
            };

            if !node.is_underfull(page_size) {
                Self::write_node(&mut txn, &node)?;
                break;
            }

            let idx = parent.position_of(node.page_id).ok_or_else(|| {
                Error::corrupted(parent.page_id, format!("{} missing from parent", node.page_id))
            })?;
            let node_is_left = idx + 1 < parent.children.len();
            let sep_idx = if node_is_left {
                idx
            } else if idx > 0 {
                idx - 1
            } else {
                // An only child has no sibling to lean on.
                Self::write_node(&mut txn, &node)?;
                node = parent;
                continue;
            };

            let sibling_id = parent.children[sep_idx + usize::from(node_is_left)];
            let sibling = Self::txn_node(&mut txn, sibling_id)?;
            let (mut left, right) = if node_is_left {
                (node, sibling)
            } else {
                (sibling, node)
            };
            let separator = parent.keys[sep_idx].clone();

            if left.merged_size(&right, &separator) <= page_size {
                let right_id = right.page_id;
                left.merge(right, separator);
                parent.remove_child(sep_idx);
                Self::write_node(&mut txn, &left)?;
                frees.push(right_id);
                debug!(left = %left.page_id, right = %right_id, "merged nodes");
                node = parent;
                continue;
            }

            let (mut new_left, mut new_right) = (left.clone(), right.clone());
            let new_separator = new_left.redistribute(&mut new_right, separator);
            let old_separator = std::mem::replace(&mut parent.keys[sep_idx], new_separator);
            if parent.fits(page_size) && new_left.fits(page_size) && new_right.fits(page_size) {
                Self::write_node(&mut txn, &new_left)?;
                Self::write_node(&mut txn, &new_right)?;
                Self::write_node(&mut txn, &parent)?;
                debug!(left = %left.page_id, right = %right.page_id, "redistributed nodes");
            } else {
                // A longer separator would overflow the parent; stay underfull.
                parent.keys[sep_idx] = old_separator;
                Self::write_node(&mut txn, if node_is_left { &left } else { &right })?;
            }
            break;
        }

        {
            let data = txn.page_mut(rid.page_id)?;
            DataPage::new(&*data)
                .validate()
                .map_err(|reason| Error::corrupted(rid.page_id, reason))?;
            let mut page = DataPage::new(data);
            if !page.delete(rid.slot) {
                return Err(Error::corrupted(
                    rid.page_id,
                    format!("slot {} is not a live record", rid.slot),
                ));
            }
            if page.live_count() == 0 {
                frees.push(rid.page_id);
            }
        }

        if let Some(root_id) = new_root {
            let mut meta = txn.metadata()?;
            meta.root = root_id;
            txn.set_metadata(&meta)?;
            debug!(root = %root_id, "tree lost a level");
        }
        for page_id in frees {
            txn.free_page(page_id)?;
        }

        txn.commit()?;
        if let (Some(root_id), Some(lock)) = (new_root, root_lock.as_mut()) {
            **lock = root_id;
        }
        Ok(())
    }

    // ========================================================================
    // Verification
    // ========================================================================

    /// Walk the whole tree checking its invariants.
    ///
    /// Checks key order within and across nodes, child counts, uniform leaf
    /// depth, the leaf chain, and that every leaf entry resolves to a live
    /// record. Expects no concurrent writers.
    pub fn verify(&self) -> Result<TreeSummary> {
        self.walk().map(|walk| walk.summary)
    }

    /// [`verify`](Self::verify), also returning every page the tree uses.
    pub(crate) fn walk(&self) -> Result<TreeWalk> {
        let mut walk = TreeWalk::default();
        self.verify_node(self.root(), None, None, 1, &mut walk)?;
        walk.summary.data_pages = walk.data_pages.len();

        let mut expected = walk.leaves.iter();
        let mut current = walk.leaves.first().copied().unwrap_or(PageId::NONE);
        while !current.is_none() {
            if expected.next() != Some(&current) {
                return Err(Error::corrupted(current, "leaf chain out of order"));
            }
            let guard = self.bpm.fetch_page_read(current)?;
            current = Self::read_node(&guard)?.next_leaf;
        }
        if let Some(&missing) = expected.next() {
            return Err(Error::corrupted(missing, "leaf missing from chain"));
        }

        Ok(walk)
    }

    fn verify_node(
        &self,
        page_id: PageId,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        depth: usize,
        walk: &mut TreeWalk,
    ) -> Result<()> {
        let node = {
            let guard = self.bpm.fetch_page_read(page_id)?;
            Self::read_node(&guard)?
        };
        walk.index_pages.push(page_id);

        if node.keys.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::corrupted(page_id, "keys not strictly increasing"));
        }
        let in_bounds = |key: &[u8]| {
            lower.map_or(true, |lo| key >= lo) && upper.map_or(true, |hi| key < hi)
        };
        if !node.keys.iter().all(|k| in_bounds(k)) {
            return Err(Error::corrupted(page_id, "key outside parent's bounds"));
        }

        if node.is_leaf {
            let summary = &mut walk.summary;
            if summary.height == 0 {
                summary.height = depth;
            } else if summary.height != depth {
                return Err(Error::corrupted(page_id, "leaves at different depths"));
            }
            if node.records.len() != node.keys.len() {
                return Err(Error::corrupted(page_id, "record count differs from key count"));
            }
            for rid in &node.records {
                self.read_record(*rid)?;
                *walk.data_pages.entry(rid.page_id).or_default() += 1;
            }
            walk.summary.leaf_pages += 1;
            walk.summary.keys += node.keys.len();
            walk.leaves.push(page_id);
            return Ok(());
        }

        if node.keys.is_empty() || node.children.len() != node.keys.len() + 1 {
            return Err(Error::corrupted(
                page_id,
                format!(
                    "{} children for {} keys",
                    node.children.len(),
                    node.keys.len()
                ),
            ));
        }
        walk.summary.internal_pages += 1;

        for (i, &child) in node.children.iter().enumerate() {
            let lo = if i == 0 {
                lower
            } else {
                Some(node.keys[i - 1].as_slice())
            };
            let hi = node.keys.get(i).map(Vec::as_slice).or(upper);
            self.verify_node(child, lo, hi, depth + 1, walk)?;
        }
        Ok(())
    }
}
