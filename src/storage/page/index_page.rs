//! B+Tree node pages.
//!
//! # Layout
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 0       32    PageHeader (free_space_pointer = end of entries)
//! 32      1     is_leaf
//! 36      4     num_keys
//! 40      8     next_leaf (0 = end of chain, leaves only)
//! 48      ...   entries
//! ```
//!
//! Leaf entry: `key_len u16 | key | data page u64 | slot u16`.
//! Internal node: `child0 u64`, then per key `key_len u16 | key | child u64`.
//!
//! Nodes are decoded into an owned [`IndexNode`], modified in memory and
//! encoded back as a whole page.

use crate::common::{PageId, RecordId};

use super::page_header::{
    read_u16, read_u32, read_u64, write_u16, write_u32, write_u64, PageHeader, PageType,
};

const OFFSET_IS_LEAF: usize = PageHeader::SIZE;
const OFFSET_NUM_KEYS: usize = PageHeader::SIZE + 4;
const OFFSET_NEXT_LEAF: usize = PageHeader::SIZE + 8;

/// First byte of the entry area.
pub const INDEX_HEADER_SIZE: usize = PageHeader::SIZE + 16;

const LEAF_ENTRY_OVERHEAD: usize = 2 + 8 + 2;
const INTERNAL_ENTRY_OVERHEAD: usize = 2 + 8;

/// Largest key an index page of `page_size` bytes accepts.
///
/// Guarantees at least eight entries per node, so a split always leaves
/// both halves well within a page.
pub const fn max_key_len(page_size: usize) -> usize {
    (page_size - INDEX_HEADER_SIZE) / 8 - LEAF_ENTRY_OVERHEAD
}

/// Largest encoded size of a single entry on a page of `page_size` bytes.
pub const fn max_entry_size(page_size: usize) -> usize {
    max_key_len(page_size) + LEAF_ENTRY_OVERHEAD
}

/// An in-memory B+Tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexNode {
    pub page_id: PageId,
    pub is_leaf: bool,
    /// Right sibling for leaves, [`PageId::NONE`] at the end of the chain.
    pub next_leaf: PageId,
    /// Strictly increasing keys.
    pub keys: Vec<Vec<u8>>,
    /// Internal nodes only: `keys.len() + 1` children.
    pub children: Vec<PageId>,
    /// Leaves only: one record location per key.
    pub records: Vec<RecordId>,
}

impl IndexNode {
    /// An empty leaf.
    pub fn new_leaf(page_id: PageId) -> Self {
        Self {
            page_id,
            is_leaf: true,
            next_leaf: PageId::NONE,
            keys: Vec::new(),
            children: Vec::new(),
            records: Vec::new(),
        }
    }

    /// An internal node with a single child and no keys.
    pub fn new_internal(page_id: PageId, first_child: PageId) -> Self {
        Self {
            page_id,
            is_leaf: false,
            next_leaf: PageId::NONE,
            keys: Vec::new(),
            children: vec![first_child],
            records: Vec::new(),
        }
    }

    /// Decode a node from page bytes.
    ///
    /// Returns a description of the problem if the page is not a
    /// well-formed index page.
    pub fn decode(data: &[u8]) -> std::result::Result<Self, String> {
        let header = PageHeader::from_bytes(data);
        if header.page_type != PageType::Index {
            return Err(format!("expected index page, found {:?}", header.page_type));
        }

        let is_leaf = match data[OFFSET_IS_LEAF] {
            0 => false,
            1 => true,
            other => return Err(format!("invalid is_leaf flag {}", other)),
        };
        let num_keys = read_u32(data, OFFSET_NUM_KEYS) as usize;
        let next_leaf = PageId::new(read_u64(data, OFFSET_NEXT_LEAF));

        let end = header.free_space_pointer as usize;
        if end < INDEX_HEADER_SIZE || end > data.len() {
            return Err(format!("free space pointer {} out of bounds", end));
        }

        let mut node = Self {
            page_id: header.page_id,
            is_leaf,
            next_leaf,
            keys: Vec::with_capacity(num_keys),
            children: Vec::new(),
            records: Vec::new(),
        };

        let mut cursor = INDEX_HEADER_SIZE;
        let truncated = || String::from("entries run past the free space pointer");

        if !is_leaf {
            if cursor + 8 > end {
                return Err(truncated());
            }
            node.children.push(PageId::new(read_u64(data, cursor)));
            cursor += 8;
        }

        for _ in 0..num_keys {
            if cursor + 2 > end {
                return Err(truncated());
            }
            let key_len = read_u16(data, cursor) as usize;
            cursor += 2;

            let tail = if is_leaf { 10 } else { 8 };
            if cursor + key_len + tail > end {
                return Err(truncated());
            }
            node.keys.push(data[cursor..cursor + key_len].to_vec());
            cursor += key_len;

            if is_leaf {
                let page = PageId::new(read_u64(data, cursor));
                let slot = read_u16(data, cursor + 8);
                node.records.push(RecordId::new(page, slot));
            } else {
                node.children.push(PageId::new(read_u64(data, cursor)));
            }
            cursor += tail;
        }

        if cursor != end {
            return Err(format!(
                "entries end at {} but free space pointer is {}",
                cursor, end
            ));
        }

        Ok(node)
    }

    /// Encode this node over `data`, keeping the page's current LSN.
    ///
    /// # Panics
    /// Panics if the node does not fit; callers check [`IndexNode::fits`].
    pub fn encode_into(&self, data: &mut [u8]) {
        assert!(self.fits(data.len()), "index node overflows its page");

        let lsn = PageHeader::from_bytes(data).lsn;
        data.fill(0);

        let mut header = PageHeader::new(self.page_id, PageType::Index);
        header.lsn = lsn;
        header.free_space_pointer = self.encoded_size() as u32;
        header.write_to(data);

        data[OFFSET_IS_LEAF] = u8::from(self.is_leaf);
        write_u32(data, OFFSET_NUM_KEYS, self.keys.len() as u32);
        write_u64(data, OFFSET_NEXT_LEAF, self.next_leaf.0);

        let mut cursor = INDEX_HEADER_SIZE;
        if !self.is_leaf {
            write_u64(data, cursor, self.children[0].0);
            cursor += 8;
        }
        for (i, key) in self.keys.iter().enumerate() {
            write_u16(data, cursor, key.len() as u16);
            cursor += 2;
            data[cursor..cursor + key.len()].copy_from_slice(key);
            cursor += key.len();
            if self.is_leaf {
                write_u64(data, cursor, self.records[i].page_id.0);
                write_u16(data, cursor + 8, self.records[i].slot);
                cursor += 10;
            } else {
                write_u64(data, cursor, self.children[i + 1].0);
                cursor += 8;
            }
        }
    }

    fn entry_size(&self, key: &[u8]) -> usize {
        key.len()
            + if self.is_leaf {
                LEAF_ENTRY_OVERHEAD
            } else {
                INTERNAL_ENTRY_OVERHEAD
            }
    }

    /// Bytes this node occupies when encoded.
    pub fn encoded_size(&self) -> usize {
        let first_child = if self.is_leaf { 0 } else { 8 };
        INDEX_HEADER_SIZE
            + first_child
            + self.keys.iter().map(|k| self.entry_size(k)).sum::<usize>()
    }

    /// Whether the encoded node fits in a page of `page_size` bytes.
    pub fn fits(&self, page_size: usize) -> bool {
        self.encoded_size() <= page_size
    }

    /// Whether one more entry of any permitted size still fits.
    pub fn is_insert_safe(&self, page_size: usize) -> bool {
        self.encoded_size() + max_entry_size(page_size) <= page_size
    }

    /// Whether the node is below minimum occupancy.
    pub fn is_underfull(&self, page_size: usize) -> bool {
        self.encoded_size() < page_size / 4
    }

    /// Whether removing one entry of any permitted size keeps the node at
    /// or above minimum occupancy.
    pub fn is_delete_safe(&self, page_size: usize) -> bool {
        self.encoded_size() >= page_size / 4 + max_entry_size(page_size)
    }

    /// Index of the child to descend into for `key`.
    ///
    /// The smallest `i` with `key < keys[i]`, or the last child.
    pub fn child_index(&self, key: &[u8]) -> usize {
        self.keys.partition_point(|k| k.as_slice() <= key)
    }

    /// Child page to descend into for `key`.
    pub fn child_for(&self, key: &[u8]) -> PageId {
        self.children[self.child_index(key)]
    }

    /// Position of `key` in a leaf: `Ok(i)` if present, `Err(i)` for the
    /// insertion point.
    pub fn search(&self, key: &[u8]) -> std::result::Result<usize, usize> {
        self.keys.binary_search_by(|k| k.as_slice().cmp(key))
    }

    /// Insert a leaf entry at `pos`.
    pub fn insert_record(&mut self, pos: usize, key: Vec<u8>, record: RecordId) {
        self.keys.insert(pos, key);
        self.records.insert(pos, record);
    }

    /// Insert a separator and the child to its right into an internal node.
    pub fn insert_child(&mut self, separator: Vec<u8>, right: PageId) {
        let pos = self.child_index(&separator);
        self.keys.insert(pos, separator);
        self.children.insert(pos + 1, right);
    }

    /// Remove the leaf entry at `pos`.
    pub fn remove_record(&mut self, pos: usize) -> (Vec<u8>, RecordId) {
        (self.keys.remove(pos), self.records.remove(pos))
    }

    /// Remove separator `pos` and the child to its right from an internal
    /// node.
    pub fn remove_child(&mut self, pos: usize) -> (Vec<u8>, PageId) {
        (self.keys.remove(pos), self.children.remove(pos + 1))
    }

    /// Position of `child` among this node's children.
    pub fn position_of(&self, child: PageId) -> Option<usize> {
        self.children.iter().position(|&c| c == child)
    }

    /// Pick a split point so both halves hold about the same number of
    /// bytes. For internal nodes the key at the split point moves up.
    fn split_point(&self) -> usize {
        let sizes: Vec<usize> = self.keys.iter().map(|k| self.entry_size(k)).collect();
        let total: usize = sizes.iter().sum();

        let mut acc = 0;
        let mut mid = 0;
        for (i, size) in sizes.iter().enumerate() {
            if acc >= total / 2 {
                break;
            }
            acc += size;
            mid = i + 1;
        }

        let upper = if self.is_leaf {
            self.keys.len().saturating_sub(1)
        } else {
            self.keys.len().saturating_sub(2)
        };
        mid.clamp(1, upper.max(1))
    }

    /// Move the upper half of this node into a new node at `right_id`.
    ///
    /// Returns the separator for the parent and the new right node. Leaves
    /// are relinked so that `self -> right -> old next`.
    pub fn split(&mut self, right_id: PageId) -> (Vec<u8>, IndexNode) {
        let mid = self.split_point();

        if self.is_leaf {
            let mut right = IndexNode::new_leaf(right_id);
            right.keys = self.keys.split_off(mid);
            right.records = self.records.split_off(mid);
            right.next_leaf = self.next_leaf;
            self.next_leaf = right_id;
            (right.keys[0].clone(), right)
        } else {
            let mut right_keys = self.keys.split_off(mid);
            let separator = right_keys.remove(0);
            let right_children = self.children.split_off(mid + 1);
            let right = IndexNode {
                page_id: right_id,
                is_leaf: false,
                next_leaf: PageId::NONE,
                keys: right_keys,
                children: right_children,
                records: Vec::new(),
            };
            (separator, right)
        }
    }

    /// Size of `self` merged with its right sibling under `separator`.
    pub fn merged_size(&self, right: &IndexNode, separator: &[u8]) -> usize {
        let pulled_down = if self.is_leaf {
            0
        } else {
            self.entry_size(separator)
        };
        self.encoded_size() + right.encoded_size() - INDEX_HEADER_SIZE + pulled_down
    }

    /// Absorb the right sibling. Internal nodes pull `separator` down.
    pub fn merge(&mut self, right: IndexNode, separator: Vec<u8>) {
        if self.is_leaf {
            self.keys.extend(right.keys);
            self.records.extend(right.records);
            self.next_leaf = right.next_leaf;
        } else {
            self.keys.push(separator);
            self.keys.extend(right.keys);
            self.children.extend(right.children);
        }
    }

    /// Even out the bytes held by `self` and its right sibling.
    ///
    /// Returns the new separator between them.
    pub fn redistribute(&mut self, right: &mut IndexNode, separator: Vec<u8>) -> Vec<u8> {
        let right_id = right.page_id;
        let right_next = right.next_leaf;
        let taken = std::mem::replace(right, IndexNode::new_leaf(right_id));

        self.merge(taken, separator);
        let (new_separator, mut new_right) = self.split(right_id);
        if self.is_leaf {
            new_right.next_leaf = right_next;
            self.next_leaf = right_id;
        }
        *right = new_right;
        new_separator
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE_SIZE: usize = 4096;

    fn key(i: u32) -> Vec<u8> {
        format!("key{:05}", i).into_bytes()
    }

    fn leaf_with(page_id: u64, range: std::ops::Range<u32>) -> IndexNode {
        let mut node = IndexNode::new_leaf(PageId::new(page_id));
        for i in range {
            let pos = node.search(&key(i)).unwrap_err();
            node.insert_record(pos, key(i), RecordId::new(PageId::new(100), i as u16));
        }
        node
    }

    #[test]
    fn test_max_key_len() {
        assert_eq!(max_key_len(4096), 494);
        assert_eq!(max_entry_size(4096) * 8, 4096 - INDEX_HEADER_SIZE);
    }

    #[test]
    fn test_leaf_encode_decode() {
        let mut node = leaf_with(3, 0..20);
        node.next_leaf = PageId::new(9);

        let mut buf = vec![0u8; PAGE_SIZE];
        node.encode_into(&mut buf);

        let header = PageHeader::from_bytes(&buf);
        assert_eq!(header.page_type, PageType::Index);
        assert_eq!(header.free_space_pointer as usize, node.encoded_size());

        assert_eq!(IndexNode::decode(&buf).unwrap(), node);
    }

    #[test]
    fn test_internal_encode_decode() {
        let mut node = IndexNode::new_internal(PageId::new(4), PageId::new(10));
        node.insert_child(key(50), PageId::new(12));
        node.insert_child(key(20), PageId::new(11));

        assert_eq!(node.keys, vec![key(20), key(50)]);
        assert_eq!(
            node.children,
            vec![PageId::new(10), PageId::new(11), PageId::new(12)]
        );

        let mut buf = vec![0u8; PAGE_SIZE];
        node.encode_into(&mut buf);
        assert_eq!(IndexNode::decode(&buf).unwrap(), node);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let buf = vec![0u8; PAGE_SIZE];
        assert!(IndexNode::decode(&buf).is_err());

        let mut buf = vec![0u8; PAGE_SIZE];
        leaf_with(3, 0..5).encode_into(&mut buf);
        write_u32(&mut buf, OFFSET_NUM_KEYS, 500);
        assert!(IndexNode::decode(&buf).is_err());
    }

    #[test]
    fn test_child_index() {
        let mut node = IndexNode::new_internal(PageId::new(1), PageId::new(10));
        node.insert_child(b"m".to_vec(), PageId::new(11));
        node.insert_child(b"t".to_vec(), PageId::new(12));

        assert_eq!(node.child_for(b"a"), PageId::new(10));
        assert_eq!(node.child_for(b"m"), PageId::new(11));
        assert_eq!(node.child_for(b"p"), PageId::new(11));
        assert_eq!(node.child_for(b"t"), PageId::new(12));
        assert_eq!(node.child_for(b"z"), PageId::new(12));
    }

    #[test]
    fn test_leaf_split_links_siblings() {
        let mut left = leaf_with(3, 0..100);
        left.next_leaf = PageId::new(77);

        let (separator, right) = left.split(PageId::new(8));

        assert_eq!(separator, right.keys[0]);
        assert_eq!(left.keys.len() + right.keys.len(), 100);
        assert!(left.keys.last().unwrap() < &right.keys[0]);
        assert_eq!(left.next_leaf, PageId::new(8));
        assert_eq!(right.next_leaf, PageId::new(77));
        assert_eq!(right.records.len(), right.keys.len());
    }

    #[test]
    fn test_internal_split_pushes_up_middle() {
        let mut node = IndexNode::new_internal(PageId::new(1), PageId::new(1000));
        for i in 0..50 {
            node.insert_child(key(i), PageId::new(1001 + i as u64));
        }

        let (separator, right) = node.split(PageId::new(2));

        assert_eq!(node.keys.len() + right.keys.len() + 1, 50);
        assert_eq!(node.children.len(), node.keys.len() + 1);
        assert_eq!(right.children.len(), right.keys.len() + 1);
        assert!(node.keys.last().unwrap() < &separator);
        assert!(separator < right.keys[0]);
    }

    #[test]
    fn test_merge_and_redistribute() {
        let mut left = leaf_with(3, 0..10);
        let right = leaf_with(4, 10..20);
        left.next_leaf = PageId::new(4);

        let sep = right.keys[0].clone();
        assert!(left.merged_size(&right, &sep) <= PAGE_SIZE);
        left.merge(right, sep);
        assert_eq!(left.keys.len(), 20);
        assert_eq!(left.next_leaf, PageId::NONE);

        let mut left = leaf_with(3, 0..2);
        let mut right = leaf_with(4, 2..40);
        left.next_leaf = PageId::new(4);
        right.next_leaf = PageId::new(5);

        let old_sep = right.keys[0].clone();
        let sep = left.redistribute(&mut right, old_sep);
        assert_eq!(sep, right.keys[0]);
        assert!(left.keys.len() >= 15);
        assert_eq!(left.keys.len() + right.keys.len(), 40);
        assert_eq!(left.next_leaf, PageId::new(4));
        assert_eq!(right.next_leaf, PageId::new(5));
        assert_eq!(right.page_id, PageId::new(4));
    }

    #[test]
    fn test_remove_child() {
        let mut node = IndexNode::new_internal(PageId::new(1), PageId::new(10));
        node.insert_child(b"m".to_vec(), PageId::new(11));
        node.insert_child(b"t".to_vec(), PageId::new(12));

        assert_eq!(node.position_of(PageId::new(11)), Some(1));
        assert_eq!(node.remove_child(0), (b"m".to_vec(), PageId::new(11)));
        assert_eq!(node.children, vec![PageId::new(10), PageId::new(12)]);
        assert_eq!(node.position_of(PageId::new(11)), None);
    }

    #[test]
    fn test_occupancy_thresholds() {
        let node = leaf_with(1, 0..2);
        assert!(node.is_underfull(PAGE_SIZE));
        assert!(!node.is_delete_safe(PAGE_SIZE));
        assert!(node.is_insert_safe(PAGE_SIZE));

        let node = leaf_with(1, 0..250);
        assert!(!node.fits(PAGE_SIZE));
    }
}
