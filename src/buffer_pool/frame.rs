use std::sync::Arc;

use parking_lot::RwLock;

use crate::pages::{Page, PageId, INVALID_PAGE_ID};

pub type SharedPage = Arc<RwLock<Page>>;

/// One buffer slot. Holds the page payload behind a shared lock plus the
/// bookkeeping the replacement strategies feed on: pin count, pin-timestamp
/// history and the clock's last-chance bit.
pub struct Frame {
    page: SharedPage,
    page_id: PageId,
    pin_count: u16,
    pin_timestamps: Vec<u64>,
    last_chance: bool,
    /// Dirty flag handed in through unpin. Kept on the frame so unpin never
    /// has to take the page lock while the pool mutex is held; the page
    /// itself tracks writes made through its own guard.
    dirty: bool,
}

impl Frame {
    pub(super) fn new() -> Self {
        Self {
            page: Arc::new(RwLock::new(Page::new())),
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            pin_timestamps: Vec::new(),
            last_chance: false,
            dirty: false,
        }
    }

    /// Installs a page into this frame, pinned once. Resets the pin history.
    pub(super) fn occupy(&mut self, page: Page, timestamp: u64) {
        self.page_id = page.page_id();
        *self.page.write() = page;
        self.pin_count = 1;
        self.pin_timestamps.clear();
        self.pin_timestamps.push(timestamp);
        self.last_chance = true;
        self.dirty = false;
    }

    pub(super) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(super) fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(super) fn release(&mut self) {
        self.page_id = INVALID_PAGE_ID;
    }

    pub fn page(&self) -> SharedPage {
        self.page.clone()
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn is_occupied(&self) -> bool {
        self.page_id != INVALID_PAGE_ID
    }

    pub(super) fn pin(&mut self, timestamp: u64) {
        self.pin_count += 1;
        self.pin_timestamps.push(timestamp);
        self.last_chance = true;
    }

    pub(super) fn unpin(&mut self) {
        debug_assert!(self.pin_count > 0);
        self.pin_count -= 1;
    }

    pub fn pin_count(&self) -> u16 {
        self.pin_count
    }

    pub fn is_pinned(&self) -> bool {
        self.pin_count > 0
    }

    /// Timestamp of the i-th most recent pin, `None` when the frame has
    /// been pinned fewer than `i` times since it was occupied.
    pub fn nth_recent_pin_timestamp(&self, i: usize) -> Option<u64> {
        self.pin_timestamps.len().checked_sub(i).map(|at| self.pin_timestamps[at])
    }

    pub fn count_all_pins(&self) -> usize {
        self.pin_timestamps.len()
    }

    pub fn is_last_chance(&self) -> bool {
        self.last_chance
    }

    pub(super) fn set_last_chance(&mut self, last_chance: bool) {
        self.last_chance = last_chance;
    }
}
