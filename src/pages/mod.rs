pub(crate) mod metadata_page;
pub(crate) mod record_page;
pub(crate) mod traits;

use crate::config::PAGE_SIZE;
use traits::Serialize;

pub type PageId = u32;
pub type SlotId = u16;

pub const INVALID_PAGE_ID: PageId = PageId::MAX;
/// Marks tuples that live in memory only and never existed on disk.
pub const MEMORY_PAGE_ID: PageId = PageId::MAX - 1;

/// Identifies one record as `(page_id, slot)` packed into 64 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId(u64);

pub const INVALID_RECORD_ID: RecordId = RecordId(u64::MAX);

impl RecordId {
    pub fn new(page_id: PageId, slot: SlotId) -> Self {
        Self(((page_id as u64) << 16) | slot as u64)
    }

    pub fn page_id(&self) -> PageId {
        (self.0 >> 16) as PageId
    }

    pub fn slot(&self) -> SlotId {
        (self.0 & u16::MAX as u64) as SlotId
    }

    pub fn is_valid(&self) -> bool {
        self.0 != u64::MAX
    }

    pub fn to_raw(self) -> u64 {
        self.0
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

/// A generic page with an underlying array of [`PAGE_SIZE`] bytes.
/// The first four bytes hold the id of the next page in a chain,
/// [`INVALID_PAGE_ID`] when the chain ends here.
#[derive(Debug)]
pub struct Page {
    data: [u8; PAGE_SIZE],
    page_id: PageId,
    is_dirty: bool,
}

impl Default for Page {
    fn default() -> Self {
        Page::new()
    }
}

impl Page {
    pub fn new() -> Self {
        let mut page = Page {
            data: [0u8; PAGE_SIZE],
            page_id: INVALID_PAGE_ID,
            is_dirty: false,
        };
        page.set_next_page_id(INVALID_PAGE_ID);
        page.is_dirty = false;
        page
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn set_page_id(&mut self, page_id: PageId) {
        self.page_id = page_id;
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    pub fn mark_clean(&mut self) {
        self.is_dirty = false;
    }

    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    pub fn next_page_id(&self) -> PageId {
        PageId::from_ne_bytes(self.data[0..4].try_into().unwrap())
    }

    pub fn has_next_page(&self) -> bool {
        self.next_page_id() != INVALID_PAGE_ID
    }

    pub fn set_next_page_id(&mut self, next_page_id: PageId) {
        self.write_bytes(0, 4, &next_page_id.to_ne_bytes());
    }

    pub fn read_bytes(&self, start: usize, end: usize) -> &[u8] {
        &self.data[start..end]
    }

    pub fn write_bytes(&mut self, start: usize, end: usize, bytes: &[u8]) {
        self.data[start..end].copy_from_slice(bytes);
        self.is_dirty = true;
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl Serialize for Page {
    fn to_bytes(&self) -> Vec<u8> {
        self.data.to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        assert_eq!(bytes.len(), PAGE_SIZE);
        let mut page = Page::new();
        page.data.copy_from_slice(bytes);
        page.is_dirty = false;
        page
    }
}
