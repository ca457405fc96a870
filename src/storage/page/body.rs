//! Typed view of a whole page, dispatched on the header's page type.

use crate::common::{Error, PageId, Result};

use super::data_page::DataPage;
use super::freelist_page::FreeListPage;
use super::index_page::IndexNode;
use super::metadata_page::MetadataPage;
use super::page_header::{PageHeader, PageType};

/// Decoded page contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageBody {
    Metadata(MetadataPage),
    /// Summary of a data page; record bytes are read through [`DataPage`].
    Data {
        slots: usize,
        live: usize,
        free_space: usize,
    },
    Index(IndexNode),
    FreeList {
        next: PageId,
        ids: Vec<PageId>,
    },
}

impl PageBody {
    /// Decode a checksum-verified page read from `page_id`.
    ///
    /// Fails with [`Error::Corrupted`] if the page is unformatted, belongs
    /// to another page ID, or violates its format's invariants.
    pub fn decode(page_id: PageId, data: &[u8]) -> Result<Self> {
        let header = PageHeader::from_bytes(data);
        if header.page_id != page_id {
            return Err(Error::corrupted(
                page_id,
                format!("header carries {}", header.page_id),
            ));
        }

        let body = match header.page_type {
            PageType::Metadata => MetadataPage::decode(data).map(PageBody::Metadata),
            PageType::Data => {
                let page = DataPage::new(data);
                page.validate().map(|()| PageBody::Data {
                    slots: page.slot_count(),
                    live: page.live_count(),
                    free_space: page.free_space(),
                })
            }
            PageType::Index => IndexNode::decode(data).map(PageBody::Index),
            PageType::FreeList => {
                let page = FreeListPage::new(data);
                page.validate().map(|()| PageBody::FreeList {
                    next: page.next(),
                    ids: page.ids(),
                })
            }
            PageType::Invalid => Err("unformatted page".to_string()),
        };

        body.map_err(|reason| Error::corrupted(page_id, reason))
    }

    pub fn page_type(&self) -> PageType {
        match self {
            PageBody::Metadata(_) => PageType::Metadata,
            PageBody::Data { .. } => PageType::Data,
            PageBody::Index(_) => PageType::Index,
            PageBody::FreeList { .. } => PageType::FreeList,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::RecordId;

    #[test]
    fn test_decode_dispatches_on_type() {
        let mut buf = vec![0u8; 1024];
        {
            let mut page = DataPage::init(&mut buf[..], PageId::new(4));
            page.insert(b"abc").unwrap();
        }
        assert_eq!(
            PageBody::decode(PageId::new(4), &buf).unwrap(),
            PageBody::Data {
                slots: 1,
                live: 1,
                free_space: 1024 - 40 - 3 - 8,
            }
        );

        let mut node = IndexNode::new_leaf(PageId::new(6));
        node.insert_record(0, b"k".to_vec(), RecordId::new(PageId::new(4), 0));
        node.encode_into(&mut buf);
        let body = PageBody::decode(PageId::new(6), &buf).unwrap();
        assert_eq!(body.page_type(), PageType::Index);
        assert_eq!(body, PageBody::Index(node));

        FreeListPage::init(&mut buf[..], PageId::new(7), PageId::new(2));
        assert_eq!(
            PageBody::decode(PageId::new(7), &buf).unwrap(),
            PageBody::FreeList {
                next: PageId::new(2),
                ids: vec![],
            }
        );
    }

    #[test]
    fn test_decode_rejects_misplaced_and_blank_pages() {
        let mut buf = vec![0u8; 1024];
        DataPage::init(&mut buf[..], PageId::new(4));
        assert!(PageBody::decode(PageId::new(5), &buf)
            .unwrap_err()
            .is_corruption());

        let blank = vec![0u8; 1024];
        assert!(PageBody::decode(PageId::new(0), &blank).is_err());
    }
}
