use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::{bail, Context, Result};
use log::debug;

use crate::config::PAGE_SIZE;
use crate::errors::Error;
use crate::pages::{PageId, MEMORY_PAGE_ID};

const STORAGE_FILE: &str = "pages.db";

#[cfg(test)]
pub fn test_path() -> String {
    use uuid::Uuid;

    let id = Uuid::new_v4();
    format!("data/test/test_{}/", id)
}

/// A single binary file of fixed-size pages. Page ids are a dense 0-based
/// sequence; a page lives at byte offset `page_id * PAGE_SIZE`.
pub struct DiskManager {
    file: File,
    count_pages: AtomicU32,
}

impl DiskManager {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        std::fs::create_dir_all(path.as_ref())
            .with_context(|| Error::DiskIO(format!("creating {}", path.as_ref().display())))?;

        let file_path = path.as_ref().join(STORAGE_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&file_path)
            .with_context(|| Error::DiskIO(format!("opening {}", file_path.display())))?;

        let length = file
            .metadata()
            .with_context(|| Error::DiskIO("reading file metadata".into()))?
            .len();
        assert_eq!(length as usize % PAGE_SIZE, 0, "storage file is not page aligned");

        Ok(Self {
            count_pages: AtomicU32::new((length as usize / PAGE_SIZE) as PageId),
            file,
        })
    }

    pub fn count_pages(&self) -> u32 {
        self.count_pages.load(Ordering::SeqCst)
    }

    /// Appends one zeroed page to the file and returns its id. Concurrent
    /// allocations each claim a distinct id; the zero-fill write keeps the
    /// file length in step with the counter.
    pub fn allocate(&self) -> Result<PageId> {
        let page_id = self.count_pages.fetch_add(1, Ordering::SeqCst);

        let zeroes = [0u8; PAGE_SIZE];
        if let Err(e) = self.file.write_all_at(&zeroes, page_id as u64 * PAGE_SIZE as u64) {
            bail!(Error::DiskIO(format!("allocating page {page_id}: {e}")));
        }

        debug!("allocated page {page_id}");
        Ok(page_id)
    }

    pub fn read(&self, page_id: PageId, buffer: &mut [u8]) -> Result<()> {
        assert_eq!(buffer.len(), PAGE_SIZE);
        if page_id >= self.count_pages() || page_id >= MEMORY_PAGE_ID {
            bail!(Error::DiskIO(format!("read of unallocated page {page_id}")));
        }

        self.file
            .read_exact_at(buffer, page_id as u64 * PAGE_SIZE as u64)
            .map_err(|e| Error::DiskIO(format!("reading page {page_id}: {e}")))
            .map_err(anyhow::Error::msg)
    }

    pub fn write(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);
        if page_id >= self.count_pages() || page_id >= MEMORY_PAGE_ID {
            bail!(Error::DiskIO(format!("write of unallocated page {page_id}")));
        }

        self.file
            .write_all_at(data, page_id as u64 * PAGE_SIZE as u64)
            .map_err(|e| Error::DiskIO(format!("writing page {page_id}: {e}")))
            .map_err(anyhow::Error::msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pages::traits::Serialize;
    use crate::pages::Page;
    use std::fs::remove_dir_all;

    #[test]
    fn test_allocate_is_monotonic_and_zeroed() -> Result<()> {
        let path = test_path();
        let disk = DiskManager::new(&path)?;

        assert_eq!(disk.allocate()?, 0);
        assert_eq!(disk.allocate()?, 1);
        assert_eq!(disk.count_pages(), 2);

        let mut buffer = [1u8; PAGE_SIZE];
        disk.read(1, &mut buffer)?;
        assert!(buffer.iter().all(|b| *b == 0));

        remove_dir_all(path)?;
        Ok(())
    }

    #[test]
    fn test_write_then_read() -> Result<()> {
        let path = test_path();
        let disk = DiskManager::new(&path)?;

        let page_id = disk.allocate()?;
        let mut page = Page::new();
        page.set_page_id(page_id);
        page.write_bytes(128, 133, b"hello");

        disk.write(page_id, &page.to_bytes())?;

        let mut buffer = [0u8; PAGE_SIZE];
        disk.read(page_id, &mut buffer)?;
        let read_back = Page::from_bytes(&buffer);
        assert_eq!(read_back.read_bytes(128, 133), b"hello");
        assert_eq!(buffer.to_vec(), page.to_bytes());

        remove_dir_all(path)?;
        Ok(())
    }

    #[test]
    fn test_out_of_range_access_fails() -> Result<()> {
        let path = test_path();
        let disk = DiskManager::new(&path)?;

        let mut buffer = [0u8; PAGE_SIZE];
        assert!(disk.read(0, &mut buffer).is_err());
        assert!(disk.write(7, &buffer).is_err());

        remove_dir_all(path)?;
        Ok(())
    }

    #[test]
    fn test_counter_survives_reopen() -> Result<()> {
        let path = test_path();
        {
            let disk = DiskManager::new(&path)?;
            disk.allocate()?;
            disk.allocate()?;
            disk.allocate()?;
        }

        let disk = DiskManager::new(&path)?;
        assert_eq!(disk.count_pages(), 3);
        assert_eq!(disk.allocate()?, 3);

        remove_dir_all(path)?;
        Ok(())
    }
}
