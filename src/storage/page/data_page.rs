//! Slotted data pages holding record bytes.
//!
//! # Layout
//! ```text
//! ┌────────────┬─────────────┬──────────────────────┬─────────┬───────────────┐
//! │ PageHeader │ num_records │ records ──▶          │  free   │ ◀── slot array │
//! │ (32 bytes) │ u32 + pad   │ 40 .. free_space_ptr │         │ 8 bytes/slot   │
//! └────────────┴─────────────┴──────────────────────┴─────────┴───────────────┘
//! ```
//!
//! Slot `i` lives at `page_size - (i + 1) * 8` and holds `(offset u32, len u32)`.
//! An offset of 0 marks a vacated slot. `num_records` counts slots, vacant
//! ones included, so slot indices stay stable for the index entries that
//! point at them.

use crate::common::PageId;

use super::page_header::{read_u32, write_u32, PageHeader, PageType};

const OFFSET_NUM_RECORDS: usize = PageHeader::SIZE;
const SLOT_SIZE: usize = 8;

/// First byte of the record area.
pub const DATA_START: usize = PageHeader::SIZE + 8;

/// Largest record a data page of `page_size` bytes can hold.
pub const fn max_record_len(page_size: usize) -> usize {
    page_size - DATA_START - SLOT_SIZE
}

/// View over the bytes of a data page.
///
/// Works over `&[u8]` for reading and `&mut [u8]` for modification.
pub struct DataPage<B> {
    buf: B,
}

impl<B: AsRef<[u8]>> DataPage<B> {
    /// Wrap an existing, already formatted data page.
    pub fn new(buf: B) -> Self {
        Self { buf }
    }

    #[inline]
    fn data(&self) -> &[u8] {
        self.buf.as_ref()
    }

    #[inline]
    fn page_size(&self) -> usize {
        self.data().len()
    }

    /// Number of slots, vacant ones included.
    pub fn slot_count(&self) -> usize {
        read_u32(self.data(), OFFSET_NUM_RECORDS) as usize
    }

    fn free_space_pointer(&self) -> usize {
        read_u32(self.data(), PageHeader::OFFSET_FREE_SPACE) as usize
    }

    fn slot_pos(&self, slot: usize) -> usize {
        self.page_size() - (slot + 1) * SLOT_SIZE
    }

    /// Raw `(offset, len)` of a slot.
    fn slot(&self, slot: usize) -> (usize, usize) {
        let pos = self.slot_pos(slot);
        (
            read_u32(self.data(), pos) as usize,
            read_u32(self.data(), pos + 4) as usize,
        )
    }

    /// Bytes of the record in `slot`, or `None` if the slot is vacant,
    /// out of range, or points outside the record area.
    pub fn record(&self, slot: u16) -> Option<&[u8]> {
        let slot = slot as usize;
        if slot >= self.slot_count() || self.slots_end() > self.page_size() {
            return None;
        }
        let (offset, len) = self.slot(slot);
        if offset == 0 || offset < DATA_START || offset + len > self.free_space_pointer() {
            return None;
        }
        Some(&self.data()[offset..offset + len])
    }

    /// Number of live (non-vacant) records.
    pub fn live_count(&self) -> usize {
        (0..self.slot_count())
            .filter(|&i| self.slot(i).0 != 0)
            .count()
    }

    /// Iterator over `(slot, record)` for all live records.
    pub fn records(&self) -> impl Iterator<Item = (u16, &[u8])> + '_ {
        (0..self.slot_count()).filter_map(move |i| self.record(i as u16).map(|r| (i as u16, r)))
    }

    /// Bytes consumed by the slot array.
    fn slots_end(&self) -> usize {
        self.slot_count() * SLOT_SIZE
    }

    fn live_bytes(&self) -> usize {
        (0..self.slot_count())
            .map(|i| self.slot(i))
            .filter(|&(offset, _)| offset != 0)
            .map(|(_, len)| len)
            .sum()
    }

    fn has_vacant_slot(&self) -> bool {
        (0..self.slot_count()).any(|i| self.slot(i).0 == 0)
    }

    /// Free bytes available after compaction.
    pub fn free_space(&self) -> usize {
        self.page_size()
            .saturating_sub(DATA_START + self.live_bytes() + self.slots_end())
    }

    /// Whether a record of `len` bytes fits, counting a new slot if needed.
    pub fn can_insert(&self, len: usize) -> bool {
        let slot_cost = if self.has_vacant_slot() { 0 } else { SLOT_SIZE };
        self.free_space() >= len + slot_cost
    }

    /// Check the page's structural invariants.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let header = PageHeader::from_bytes(self.data());
        if header.page_type != PageType::Data {
            return Err(format!("expected data page, found {:?}", header.page_type));
        }
        let fsp = self.free_space_pointer();
        if fsp < DATA_START || fsp + self.slots_end() > self.page_size() {
            return Err(format!(
                "free space pointer {} overlaps {} slots",
                fsp,
                self.slot_count()
            ));
        }
        for i in 0..self.slot_count() {
            let (offset, len) = self.slot(i);
            if offset != 0 && (offset < DATA_START || offset + len > fsp) {
                return Err(format!("slot {} points outside the record area", i));
            }
        }
        Ok(())
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> DataPage<B> {
    /// Format `buf` as an empty data page.
    pub fn init(mut buf: B, page_id: PageId) -> Self {
        let data = buf.as_mut();
        data.fill(0);
        let mut header = PageHeader::new(page_id, PageType::Data);
        header.free_space_pointer = DATA_START as u32;
        header.write_to(data);
        Self { buf }
    }

    #[inline]
    fn data_mut(&mut self) -> &mut [u8] {
        self.buf.as_mut()
    }

    fn set_slot_count(&mut self, count: usize) {
        write_u32(self.data_mut(), OFFSET_NUM_RECORDS, count as u32);
    }

    fn set_free_space_pointer(&mut self, fsp: usize) {
        write_u32(self.data_mut(), PageHeader::OFFSET_FREE_SPACE, fsp as u32);
    }

    fn set_slot(&mut self, slot: usize, offset: usize, len: usize) {
        let pos = self.slot_pos(slot);
        let data = self.data_mut();
        write_u32(data, pos, offset as u32);
        write_u32(data, pos + 4, len as u32);
    }

    /// Store `record`, returning its slot, or `None` if it does not fit.
    ///
    /// Vacated slots are reused before the slot array grows.
    pub fn insert(&mut self, record: &[u8]) -> Option<u16> {
        if !self.can_insert(record.len()) {
            return None;
        }

        let count = self.slot_count();
        let slot = (0..count).find(|&i| self.slot(i).0 == 0).unwrap_or(count);
        let new_slots_end = if slot == count {
            (count + 1) * SLOT_SIZE
        } else {
            self.slots_end()
        };

        if self.free_space_pointer() + record.len() + new_slots_end > self.page_size() {
            self.compact();
        }

        let offset = self.free_space_pointer();
        self.data_mut()[offset..offset + record.len()].copy_from_slice(record);
        self.set_free_space_pointer(offset + record.len());
        if slot == count {
            self.set_slot_count(count + 1);
        }
        self.set_slot(slot, offset, record.len());

        Some(slot as u16)
    }

    /// Vacate `slot`. Returns `false` if it was not live.
    ///
    /// Trailing vacant slots are trimmed from the slot array.
    pub fn delete(&mut self, slot: u16) -> bool {
        if self.record(slot).is_none() {
            return false;
        }
        self.set_slot(slot as usize, 0, 0);

        let mut count = self.slot_count();
        while count > 0 && self.slot(count - 1).0 == 0 {
            count -= 1;
        }
        self.set_slot_count(count);

        if count == 0 {
            self.set_free_space_pointer(DATA_START);
        }
        true
    }

    /// Rewrite live records contiguously from the start of the record area.
    ///
    /// Slot indices do not change.
    pub fn compact(&mut self) {
        let mut live: Vec<(usize, usize, usize)> = (0..self.slot_count())
            .map(|i| (i, self.slot(i)))
            .filter(|&(_, (offset, _))| offset != 0)
            .map(|(i, (offset, len))| (i, offset, len))
            .collect();
        live.sort_by_key(|&(_, offset, _)| offset);

        let mut cursor = DATA_START;
        for (slot, offset, len) in live {
            if offset != cursor {
                self.data_mut().copy_within(offset..offset + len, cursor);
                self.set_slot(slot, cursor, len);
            }
            cursor += len;
        }
        self.set_free_space_pointer(cursor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_page(size: usize) -> Vec<u8> {
        let mut buf = vec![0u8; size];
        DataPage::init(&mut buf[..], PageId::new(5));
        buf
    }

    #[test]
    fn test_init() {
        let buf = new_page(4096);
        let page = DataPage::new(&buf[..]);
        assert_eq!(page.slot_count(), 0);
        assert_eq!(page.live_count(), 0);
        assert_eq!(page.free_space(), 4096 - DATA_START);
        assert!(page.validate().is_ok());
        assert_eq!(PageHeader::from_bytes(&buf).page_type, PageType::Data);
    }

    #[test]
    fn test_insert_and_read() {
        let mut buf = new_page(4096);
        let mut page = DataPage::new(&mut buf[..]);

        assert_eq!(page.insert(b"hello"), Some(0));
        assert_eq!(page.insert(b"world!"), Some(1));
        assert_eq!(page.insert(b""), Some(2));

        assert_eq!(page.record(0), Some(&b"hello"[..]));
        assert_eq!(page.record(1), Some(&b"world!"[..]));
        assert_eq!(page.record(2), Some(&b""[..]));
        assert_eq!(page.record(3), None);
        assert_eq!(page.slot_count(), 3);
        assert!(page.validate().is_ok());
    }

    #[test]
    fn test_delete_reuses_slot() {
        let mut buf = new_page(4096);
        let mut page = DataPage::new(&mut buf[..]);

        page.insert(b"a").unwrap();
        page.insert(b"b").unwrap();
        page.insert(b"c").unwrap();

        assert!(page.delete(1));
        assert!(!page.delete(1));
        assert_eq!(page.record(1), None);
        assert_eq!(page.slot_count(), 3);
        assert_eq!(page.live_count(), 2);

        // Vacant slot 1 is reused, slot 2 keeps its record
        assert_eq!(page.insert(b"d"), Some(1));
        assert_eq!(page.record(1), Some(&b"d"[..]));
        assert_eq!(page.record(2), Some(&b"c"[..]));
    }

    #[test]
    fn test_trailing_slots_trimmed() {
        let mut buf = new_page(4096);
        let mut page = DataPage::new(&mut buf[..]);

        page.insert(b"a").unwrap();
        page.insert(b"b").unwrap();
        page.insert(b"c").unwrap();

        page.delete(1);
        page.delete(2);
        assert_eq!(page.slot_count(), 1);

        page.delete(0);
        assert_eq!(page.slot_count(), 0);
        assert_eq!(page.free_space(), 4096 - DATA_START);
    }

    #[test]
    fn test_full_page_then_compaction() {
        let mut buf = new_page(512);
        let mut page = DataPage::new(&mut buf[..]);

        let record = [7u8; 100];
        let mut slots = Vec::new();
        while let Some(slot) = page.insert(&record) {
            slots.push(slot);
        }
        assert_eq!(slots.len(), 4);
        assert!(!page.can_insert(100));

        // Freeing the first record leaves a hole that only compaction reaches
        page.delete(slots[0]);
        let bigger = [9u8; 100];
        assert_eq!(page.insert(&bigger), Some(slots[0]));
        assert_eq!(page.record(slots[0]), Some(&bigger[..]));
        for &slot in &slots[1..] {
            assert_eq!(page.record(slot), Some(&record[..]));
        }
        assert!(page.validate().is_ok());
    }

    #[test]
    fn test_max_record() {
        let mut buf = new_page(1024);
        let mut page = DataPage::new(&mut buf[..]);

        let max = max_record_len(1024);
        assert!(!page.can_insert(max + 1));
        let record = vec![1u8; max];
        assert_eq!(page.insert(&record), Some(0));
        assert!(!page.can_insert(0));
    }

    #[test]
    fn test_validate_detects_bad_slot() {
        let mut buf = new_page(1024);
        {
            let mut page = DataPage::new(&mut buf[..]);
            page.insert(b"abc").unwrap();
        }
        // Point slot 0 past the free space pointer
        write_u32(&mut buf, 1024 - 8, 900);
        assert!(DataPage::new(&buf[..]).validate().is_err());
        assert_eq!(DataPage::new(&buf[..]).record(0), None);
    }
}
