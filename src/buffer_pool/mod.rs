mod frame;
mod replacer;

use std::collections::{HashMap, LinkedList};
use std::sync::Arc;

use anyhow::{bail, Result};
use log::{debug, trace};
use parking_lot::FairMutex;

use crate::config::{Config, PAGE_SIZE};
use crate::disk_manager::DiskManager;
use crate::errors::Error;
use crate::pages::traits::Serialize;
use crate::pages::record_page::RecordPage;
use crate::pages::{Page, PageId};

use frame::Frame;
pub use frame::SharedPage;

pub(crate) type FrameId = usize;
pub type ArcBufferPool = Arc<FairMutex<BufferPool>>;

/// Frame cache in front of the disk manager. All page access goes through
/// [`BufferPool::pin`]; a pinned page stays resident until every pin is
/// released again. One mutex (the [`ArcBufferPool`] wrapper) protects the
/// frame table and the replacement strategy; the page payloads themselves
/// are shared out behind their own read-write locks.
pub struct BufferPool {
    disk_manager: DiskManager,

    frames: Vec<Frame>,
    free_frames: LinkedList<FrameId>,
    page_table: HashMap<PageId, FrameId>,

    replacer: Box<dyn replacer::Replacer>,

    pin_sequence: u64,
    evicted_frames: u64,
}

impl BufferPool {
    pub fn new(config: &Config, disk_manager: DiskManager) -> Self {
        let size = config.buffer_frames;
        Self {
            disk_manager,
            frames: (0..size).map(|_| Frame::new()).collect(),
            free_frames: LinkedList::from_iter(0..size),
            page_table: HashMap::new(),
            replacer: replacer::build(config.replacement_strategy, size, config.lru_k),
            pin_sequence: 0,
            evicted_frames: 0,
        }
    }

    pub fn disk_manager(&self) -> &DiskManager {
        &self.disk_manager
    }

    /// Number of frames given up to make room so far.
    pub fn evicted_frames(&self) -> u64 {
        self.evicted_frames
    }

    /// Returns the frame holding `page_id`, loading it from disk first if
    /// it is not resident. The page stays in its frame until a matching
    /// [`Self::unpin`].
    pub fn pin(&mut self, page_id: PageId) -> Result<SharedPage> {
        if let Some(&frame_id) = self.page_table.get(&page_id) {
            let timestamp = self.next_pin_timestamp();
            let frame = &mut self.frames[frame_id];
            frame.pin(timestamp);
            self.replacer.on_pin(frame_id, timestamp);

            trace!(
                "pinned resident page {page_id} (frame {frame_id}), pin count {}",
                frame.pin_count()
            );
            return Ok(frame.page());
        }

        // Read before touching any frame: a failed read must leave the pool
        // exactly as it was.
        let mut buffer = [0u8; PAGE_SIZE];
        self.disk_manager.read(page_id, &mut buffer)?;

        let frame_id = self.find_free_frame()?;
        let timestamp = self.next_pin_timestamp();

        let mut page = Page::from_bytes(&buffer);
        page.set_page_id(page_id);

        self.frames[frame_id].occupy(page, timestamp);
        self.page_table.insert(page_id, frame_id);
        self.replacer.on_pin(frame_id, timestamp);

        trace!("pinned page {page_id} into frame {frame_id}");
        Ok(self.frames[frame_id].page())
    }

    /// Releases one pin and merges the caller's dirty flag into the page.
    pub fn unpin(&mut self, page_id: PageId, dirty: bool) -> Result<()> {
        let Some(&frame_id) = self.page_table.get(&page_id) else {
            bail!(Error::PageNotPinned(page_id));
        };

        let frame = &mut self.frames[frame_id];
        if !frame.is_pinned() {
            bail!(Error::PageNotPinned(page_id));
        }
        frame.unpin();
        if dirty {
            frame.mark_dirty();
        }

        trace!(
            "unpinned page {page_id} (frame {frame_id}), pin count {}",
            frame.pin_count()
        );
        Ok(())
    }

    /// Allocates a fresh page on disk and returns it pinned, with the
    /// next-page header initialized.
    pub fn allocate_page(&mut self) -> Result<SharedPage> {
        let frame_id = self.find_free_frame()?;
        let page_id = self.disk_manager.allocate()?;
        let timestamp = self.next_pin_timestamp();

        let mut page = Page::new();
        page.set_page_id(page_id);
        // redo the header write so the fresh page counts as dirty and the
        // invalid next-pointer reaches disk
        page.set_next_page_id(crate::pages::INVALID_PAGE_ID);

        self.frames[frame_id].occupy(page, timestamp);
        self.page_table.insert(page_id, frame_id);
        self.replacer.on_pin(frame_id, timestamp);

        debug!("allocated page {page_id} into frame {frame_id}");
        Ok(self.frames[frame_id].page())
    }

    /// Allocates a fresh page and prepares it for slotted records.
    pub fn allocate_record_page(&mut self) -> Result<SharedPage> {
        let shared = self.allocate_page()?;
        RecordPage::initialize(&mut shared.write());
        Ok(shared)
    }

    fn next_pin_timestamp(&mut self) -> u64 {
        self.pin_sequence += 1;
        self.pin_sequence
    }

    fn find_free_frame(&mut self) -> Result<FrameId> {
        if let Some(frame_id) = self.free_frames.pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = self.replacer.find_victim(&mut self.frames) else {
            bail!(Error::NoFreeFrame);
        };
        self.evict_frame(frame_id)?;
        Ok(frame_id)
    }

    fn evict_frame(&mut self, frame_id: FrameId) -> Result<()> {
        let frame = &self.frames[frame_id];
        assert!(!frame.is_pinned(), "chose a pinned frame for eviction");

        let shared = frame.page();
        let frame_dirty = frame.is_dirty();
        let mut page = shared.write();
        let page_id = page.page_id();

        let dirty = frame_dirty || page.is_dirty();
        debug!("evicting page {page_id} (frame {frame_id}), dirty: {dirty}");

        if dirty {
            self.disk_manager.write(page_id, &page.to_bytes())?;
            page.mark_clean();
        }

        self.page_table.remove(&page_id);
        drop(page);
        self.frames[frame_id].clear_dirty();
        self.frames[frame_id].release();
        self.evicted_frames += 1;

        Ok(())
    }

    /// Writes one resident page through to disk. The caller must not hold a
    /// guard on this page across the call.
    pub fn flush_page(&mut self, page_id: PageId) -> Result<()> {
        let Some(&frame_id) = self.page_table.get(&page_id) else {
            bail!(Error::Internal(format!("flush of non-resident page {page_id}")));
        };

        let shared = self.frames[frame_id].page();
        let frame_dirty = self.frames[frame_id].is_dirty();
        let mut page = shared.write();
        if frame_dirty || page.is_dirty() {
            self.disk_manager.write(page_id, &page.to_bytes())?;
            page.mark_clean();
        }
        drop(page);
        self.frames[frame_id].clear_dirty();
        Ok(())
    }

    /// Writes every dirty resident page back. Shutdown only; every pin must
    /// have been released by now.
    pub fn flush(&mut self) -> Result<()> {
        for frame in &mut self.frames {
            if !frame.is_occupied() {
                continue;
            }
            if frame.is_pinned() {
                bail!(Error::Internal(format!(
                    "flush with page {} still pinned {} times",
                    frame.page_id(),
                    frame.pin_count()
                )));
            }

            let shared = frame.page();
            let frame_dirty = frame.is_dirty();
            let mut page = shared.write();
            if frame_dirty || page.is_dirty() {
                self.disk_manager.write(page.page_id(), &page.to_bytes())?;
                page.mark_clean();
            }
            drop(page);
            frame.clear_dirty();
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn pin_count(&self, page_id: PageId) -> Option<u16> {
        let frame_id = *self.page_table.get(&page_id)?;
        Some(self.frames[frame_id].pin_count())
    }

    #[cfg(test)]
    pub fn is_resident(&self, page_id: PageId) -> bool {
        self.page_table.contains_key(&page_id)
    }
}

/// Scoped pin. Unpins on drop, carrying the dirty flag the holder set.
pub struct PinGuard {
    bpm: ArcBufferPool,
    page: SharedPage,
    page_id: PageId,
    dirty: bool,
}

impl PinGuard {
    pub fn new(bpm: ArcBufferPool, page_id: PageId) -> Result<Self> {
        let page = bpm.lock().pin(page_id)?;
        Ok(Self {
            bpm,
            page,
            page_id,
            dirty: false,
        })
    }

    pub fn page(&self) -> &SharedPage {
        &self.page
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        if let Err(e) = self.bpm.lock().unpin(self.page_id, self.dirty) {
            log::warn!("failed to unpin page {}: {e}", self.page_id);
        }
    }
}
